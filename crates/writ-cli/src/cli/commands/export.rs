use crate::cli::args::ExportArgs;
use crate::cli::helpers::load_gate;
use crate::exit_codes::{INTERNAL_ERROR, SUCCESS};
use std::path::Path;
use writ_core::{ExportQuery, GateError};

pub fn run(config: &Path, args: ExportArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    match gate.export(&ExportQuery {
        since_ms: args.since_ms,
        until_ms: args.until_ms,
        correlation_id: args.correlation,
        limit: args.limit,
    }) {
        Ok(ndjson) => {
            print!("{ndjson}");
            Ok(SUCCESS)
        }
        Err(e @ GateError::ExportUnavailable) => {
            eprintln!("export failed: {e}");
            Ok(INTERNAL_ERROR)
        }
        Err(e) => Err(e.into()),
    }
}
