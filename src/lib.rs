//! Correction and interactive flagging of GC trace-gas measurements.
//!
//! ```text
//!   measurements ──► correction::engine ──► data::feed ──► session::FlaggingSession
//!                         ▲                                      │
//!                   RuleTable (config/rules.toml)                ▼
//!                                                    FlagRecord export ──► report
//! ```

pub mod config;
pub mod correction;
pub mod data;
pub mod error;
pub mod report;
pub mod session;
