//! Integration tests for the hierarchical aggregation cache

mod cli_contracts;
mod incremental_vs_bulk;
mod invariants;
mod scenario;
mod service_fallback;
mod support;
