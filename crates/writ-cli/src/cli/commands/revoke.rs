use crate::cli::args::RevokeArgs;
use crate::cli::helpers::{load_gate, print_json};
use crate::exit_codes::SUCCESS;
use anyhow::bail;
use std::path::Path;
use writ_core::RevokeSelector;

pub fn run(config: &Path, args: RevokeArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    let selector = if let Some(jti) = &args.jti {
        RevokeSelector::Token(jti)
    } else if let Some(session) = &args.session {
        RevokeSelector::Session(session)
    } else if let Some(tenant) = &args.tenant {
        RevokeSelector::Tenant(tenant)
    } else {
        bail!("one of --jti, --session, or --tenant is required");
    };

    let revoked_count = gate.revoke(&selector)?;
    print_json(&serde_json::json!({ "revoked_count": revoked_count }))?;
    Ok(SUCCESS)
}
