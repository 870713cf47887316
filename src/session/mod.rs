//! Live mining session aggregation (C8) and report persistence (C9),
//! per SPEC_FULL.md §4.8-§4.9.

pub mod aggregator;
pub mod persistence;
