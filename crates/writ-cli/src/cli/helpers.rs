use super::args::ContextArgs;
use anyhow::{bail, Context};
use std::path::Path;
use writ_core::{ConsentGate, GateConfig};

pub fn load_gate(config_path: &Path) -> anyhow::Result<ConsentGate> {
    let config = GateConfig::from_yaml_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    ConsentGate::new(config).context("constructing gate")
}

/// Resolve the context hash: taken verbatim, or computed from raw JSON args
/// exactly the way the gateway computes it.
pub fn resolve_context_hash(
    context: &ContextArgs,
    tool: &str,
    session: &str,
) -> anyhow::Result<String> {
    match (&context.context_hash, &context.args) {
        (Some(hash), None) => Ok(hash.clone()),
        (None, Some(raw)) => {
            let args: serde_json::Value =
                serde_json::from_str(raw).context("parsing --args as JSON")?;
            writ_core::context_hash(tool, session, &args).context("hashing context")
        }
        (None, None) => bail!("one of --context-hash or --args is required"),
        (Some(_), Some(_)) => unreachable!("clap rejects conflicting context flags"),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
