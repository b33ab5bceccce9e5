use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::data::model::{AxisPair, Compound};

// ---------------------------------------------------------------------------
// Selection sets, scoped per compound and axis pair
// ---------------------------------------------------------------------------

/// Selected timestamps per `(compound, axis pair)`.
///
/// A box drawn under one axis mapping says nothing about the same points
/// under another mapping, so each pair keeps its own set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSets {
    sets: BTreeMap<(Compound, AxisPair), BTreeSet<DateTime<Utc>>>,
}

impl SelectionSets {
    pub fn is_selected(&self, compound: Compound, axes: AxisPair, ts: &DateTime<Utc>) -> bool {
        self.sets
            .get(&(compound, axes))
            .is_some_and(|set| set.contains(ts))
    }

    /// Flip one point; returns whether it is selected afterwards.
    pub fn toggle(&mut self, compound: Compound, axes: AxisPair, ts: DateTime<Utc>) -> bool {
        let set = self.sets.entry((compound, axes)).or_default();
        if set.remove(&ts) {
            false
        } else {
            set.insert(ts);
            true
        }
    }

    /// Returns `true` if the point was not selected before.
    pub fn insert(&mut self, compound: Compound, axes: AxisPair, ts: DateTime<Utc>) -> bool {
        self.sets.entry((compound, axes)).or_default().insert(ts)
    }

    /// Returns `true` if the point was selected before.
    pub fn remove(&mut self, compound: Compound, axes: AxisPair, ts: &DateTime<Utc>) -> bool {
        self.sets
            .get_mut(&(compound, axes))
            .is_some_and(|set| set.remove(ts))
    }

    /// Forget every selection for `compound`, under every axis pair.
    pub fn clear_compound(&mut self, compound: Compound) {
        self.sets.retain(|(c, _), _| *c != compound);
    }

    pub fn clear_all(&mut self) {
        self.sets.clear();
    }

    /// Selected points of `compound`, summed over every axis pair.
    pub fn count_compound(&self, compound: Compound) -> usize {
        self.sets
            .iter()
            .filter(|((c, _), _)| *c == compound)
            .map(|(_, set)| set.len())
            .sum()
    }

    pub fn total(&self) -> usize {
        self.sets.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Every selected point, ordered by compound, axis pair, timestamp.
    pub fn iter(&self) -> impl Iterator<Item = (Compound, AxisPair, DateTime<Utc>)> + '_ {
        self.sets
            .iter()
            .flat_map(|(&(c, axes), set)| set.iter().map(move |ts| (c, axes, *ts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Field;
    use chrono::TimeZone;

    fn ts(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn toggle_flips_membership() {
        let c = Compound::parse("CFC-12").unwrap();
        let axes = AxisPair::default();
        let mut sets = SelectionSets::default();
        assert!(sets.toggle(c, axes, ts(1)));
        assert!(sets.is_selected(c, axes, &ts(1)));
        assert!(!sets.toggle(c, axes, ts(1)));
        assert!(!sets.is_selected(c, axes, &ts(1)));
    }

    #[test]
    fn sets_are_scoped_per_axis_pair() {
        let c = Compound::parse("CFC-12").unwrap();
        let mr = AxisPair::default();
        let pa = AxisPair::new(Field::Date, Field::PeakArea);
        let mut sets = SelectionSets::default();
        sets.insert(c, mr, ts(1));
        assert!(!sets.is_selected(c, pa, &ts(1)));
        assert!(sets.is_selected(c, mr, &ts(1)));
        assert_eq!(sets.count_compound(c), 1);
    }

    #[test]
    fn clear_compound_leaves_others() {
        let a = Compound::parse("CFC-12").unwrap();
        let b = Compound::parse("ethane").unwrap();
        let axes = AxisPair::default();
        let mut sets = SelectionSets::default();
        sets.insert(a, axes, ts(1));
        sets.insert(a, AxisPair::new(Field::Date, Field::RetentionTime), ts(2));
        sets.insert(b, axes, ts(1));
        assert_eq!(sets.count_compound(a), 2);
        sets.clear_compound(a);
        assert_eq!(sets.total(), 1);
        assert!(sets.is_selected(b, axes, &ts(1)));
        sets.clear_all();
        assert!(sets.is_empty());
    }
}
