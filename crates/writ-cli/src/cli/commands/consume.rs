use crate::cli::args::ConsumeArgs;
use crate::cli::helpers::{load_gate, print_json, resolve_context_hash};
use crate::exit_codes::{DENIED, SUCCESS};
use std::path::Path;
use writ_core::ConsumeInput;

pub fn run(config: &Path, args: ConsumeArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    let context_hash = resolve_context_hash(&args.context, &args.tool, &args.session)?;

    let decision = gate.consume(&ConsumeInput {
        token_id: args.token.as_deref(),
        tool: &args.tool,
        session_key: &args.session,
        tenant_id: args.tenant.as_deref(),
        context_hash: &context_hash,
        correlation_id: args.correlation.as_deref(),
    });
    print_json(&decision)?;
    // Observe-only denials are advisory: only a blocking denial exits
    // non-zero.
    Ok(if decision.blocks() { DENIED } else { SUCCESS })
}
