pub mod consume;
pub mod export;
pub mod issue;
pub mod metrics;
pub mod quarantine;
pub mod revoke;
pub mod status;

use super::args::{Cli, Command};
use crate::exit_codes::SUCCESS;

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Issue(args) => issue::run(&cli.config, args),
        Command::Consume(args) => consume::run(&cli.config, args),
        Command::Status(args) => status::run(&cli.config, args),
        Command::Revoke(args) => revoke::run(&cli.config, args),
        Command::Metrics => metrics::run(&cli.config),
        Command::Export(args) => export::run(&cli.config, args),
        Command::Quarantine(args) => quarantine::run(&cli.config, args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
