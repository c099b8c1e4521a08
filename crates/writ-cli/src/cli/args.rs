use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "writ",
    version,
    about = "Consent gate for AI agent tool calls — single-use tokens, audit WAL, containment"
)]
pub struct Cli {
    /// Gate configuration file.
    #[arg(long, global = true, default_value = "writ.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Issue a consent token for one tool invocation
    Issue(IssueArgs),
    /// Consume a token at the tool-invocation choke point
    Consume(ConsumeArgs),
    /// Show recent gate decisions from the WAL
    Status(StatusArgs),
    /// Revoke tokens by jti, session, or tenant
    Revoke(RevokeArgs),
    /// Print the metrics counters snapshot
    Metrics,
    /// Export WAL events as newline-delimited JSON (durable storage only)
    Export(ExportArgs),
    /// Quarantine administration
    Quarantine(QuarantineArgs),
    Version,
}

/// The invocation context: either precomputed, or raw JSON args the CLI
/// hashes the same way the gateway does.
#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Precomputed context hash (sha256:<hex>)
    #[arg(long, conflicts_with = "args")]
    pub context_hash: Option<String>,

    /// Invocation arguments as a JSON object to hash
    #[arg(long)]
    pub args: Option<String>,
}

#[derive(Args, Debug)]
pub struct IssueArgs {
    #[arg(long)]
    pub tool: String,

    #[arg(long)]
    pub session: String,

    #[arg(long)]
    pub tenant: Option<String>,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Token lifetime in seconds (defaults to the configured TTL)
    #[arg(long)]
    pub ttl: Option<i64>,

    #[arg(long)]
    pub correlation: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Token id; omit to exercise the no-token denial path
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long)]
    pub tool: String,

    #[arg(long)]
    pub session: String,

    #[arg(long)]
    pub tenant: Option<String>,

    #[command(flatten)]
    pub context: ContextArgs,

    #[arg(long)]
    pub correlation: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long)]
    pub session: Option<String>,

    #[arg(long)]
    pub tenant: Option<String>,

    /// Unix milliseconds lower bound
    #[arg(long)]
    pub since_ms: Option<i64>,

    #[arg(long, default_value_t = 100)]
    pub limit: usize,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RevokeArgs {
    /// Revoke a single token by id
    #[arg(long)]
    pub jti: Option<String>,

    /// Revoke every pending token of a session
    #[arg(long)]
    pub session: Option<String>,

    /// Revoke every pending token of a tenant
    #[arg(long)]
    pub tenant: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long)]
    pub since_ms: Option<i64>,

    #[arg(long)]
    pub until_ms: Option<i64>,

    /// Requested limit; capped at the export hard maximum (10000)
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub correlation: Option<String>,
}

#[derive(Args, Debug)]
pub struct QuarantineArgs {
    #[command(subcommand)]
    pub cmd: QuarantineSub,
}

#[derive(Subcommand, Debug)]
pub enum QuarantineSub {
    /// Lift an active quarantine for a session
    Lift { session: String },
    /// Show the quarantine record for a session
    Show { session: String },
}
