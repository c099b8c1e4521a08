use crate::cli::args::StatusArgs;
use crate::cli::helpers::{load_gate, print_json};
use crate::exit_codes::SUCCESS;
use std::path::Path;
use writ_core::StatusQuery;

pub fn run(config: &Path, args: StatusArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    let events = gate.status(&StatusQuery {
        session_key: args.session,
        tenant_id: args.tenant,
        since_ms: args.since_ms,
        limit: Some(args.limit),
    })?;
    print_json(&events)?;
    Ok(SUCCESS)
}
