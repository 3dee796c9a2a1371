//! A continuous, steppable session over a stateless emulator binary.
//!
//! The emulator has no persistent process state: every invocation cold
//! resets the cartridge, runs, and exits. `ReplaySession` papers over that
//! by recording every input event and frame advance locally, then
//! replaying the *entire* history in a single invocation whenever a memory
//! observation is requested. Recording is free; only `read_memory` spawns
//! a process.

mod input;
mod session;

pub use input::{Button, InputEvent};
pub use session::ReplaySession;

use smod_core::verify::Expectation;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(
        "emulator exited with status {status}\ncommand: {command}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    ProcessFailure {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("emulator timed out after {timeout:?}\ncommand: {command}")]
    Timeout { command: String, timeout: Duration },
    #[error("failed to spawn emulator\ncommand: {command}\ncause: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("emulator reported success but wrote no dump at {path}\ncommand: {command}")]
    MissingDump { command: String, path: String },
    #[error("memory dump at {path} was {got} bytes, expected {expected}\ncommand: {command}")]
    ShortDump {
        command: String,
        path: String,
        expected: usize,
        got: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a replay read and compare the observed bytes to an expectation.
/// This is the runtime half of patch verification: the static byte diff
/// says the image changed, this says the change took effect.
pub fn sample_and_compare(
    session: &mut ReplaySession,
    addr: u32,
    size: usize,
    expectation: &Expectation,
) -> Result<bool, ReplayError> {
    let observed = session.read_memory(addr, size)?;
    let matched = expectation.matches(&observed);
    if matched {
        log::info!("runtime sample at ${:06X} matches expectation", addr);
    } else {
        log::warn!(
            "runtime sample at ${:06X} does not match: observed {}",
            addr,
            hex(&observed)
        );
    }
    Ok(matched)
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
