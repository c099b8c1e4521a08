use crate::cli::args::IssueArgs;
use crate::cli::helpers::{load_gate, print_json, resolve_context_hash};
use crate::exit_codes::{DENIED, SUCCESS};
use std::path::Path;
use writ_core::{GateError, IssueRequest};

pub fn run(config: &Path, args: IssueArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    let context_hash = resolve_context_hash(&args.context, &args.tool, &args.session)?;

    let request = IssueRequest {
        tool: &args.tool,
        session_key: &args.session,
        tenant_id: args.tenant.as_deref(),
        context_hash: &context_hash,
        ttl_secs: args.ttl,
        correlation_id: args.correlation.as_deref(),
    };
    match gate.issue(&request) {
        Ok(issued) => {
            print_json(&issued)?;
            Ok(SUCCESS)
        }
        Err(e @ GateError::QuarantineActive { .. }) => {
            print_json(&serde_json::json!({
                "error": e.reason_code().map(|r| r.as_str()),
                "message": e.to_string(),
            }))?;
            Ok(DENIED)
        }
        Err(e) => Err(e.into()),
    }
}
