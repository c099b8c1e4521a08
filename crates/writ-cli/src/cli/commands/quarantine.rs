use crate::cli::args::{QuarantineArgs, QuarantineSub};
use crate::cli::helpers::{load_gate, print_json};
use crate::exit_codes::SUCCESS;
use std::path::Path;

pub fn run(config: &Path, args: QuarantineArgs) -> anyhow::Result<i32> {
    let gate = load_gate(config)?;
    match args.cmd {
        QuarantineSub::Lift { session } => {
            let lifted = gate.lift_quarantine(&session)?;
            print_json(&serde_json::json!({ "lifted": lifted }))?;
            Ok(SUCCESS)
        }
        QuarantineSub::Show { session } => {
            match gate.quarantine_record(&session) {
                Some(record) => print_json(&record)?,
                None => print_json(&serde_json::json!({ "session_key": session, "active": false }))?,
            }
            Ok(SUCCESS)
        }
    }
}
