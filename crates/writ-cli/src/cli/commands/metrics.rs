use crate::cli::helpers::{load_gate, print_json};
use crate::exit_codes::SUCCESS;
use std::path::Path;
use writ_core::{MetricsAggregator, StatusQuery};

pub fn run(config: &Path) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    // The aggregator is a derived view: a fresh process rebuilds it by
    // replaying the WAL, reaching the same counters a live gate observed.
    let events = gate.status(&StatusQuery::default())?;
    let metrics = MetricsAggregator::from_events(&events);
    print_json(&metrics.snapshot())?;
    Ok(SUCCESS)
}
