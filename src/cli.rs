//! Command-line surface.
//!
//! `lmbridge "<prompt>"` relays once and prints the pretty JSON result;
//! `--server` anywhere on the command line starts the HTTP listener instead.
//!
//! In one-shot mode every argument is prompt text, including words that look
//! like flags, and settings come from the environment. Only server mode
//! parses flags.

use std::io::{self, Write};

use clap::Parser;

use crate::config::BridgeConfig;
use crate::relay::{ChatRequest, Relay};

pub const USAGE: &str = "Usage: lmbridge \"Your question\"";

/// Switches the binary into server mode wherever it appears.
pub const SERVER_FLAG: &str = "--server";

#[derive(Debug, Parser)]
#[command(name = "lmbridge", version, about = "Relay prompts to a chat model")]
pub struct Cli {
    /// Serve `/health` and `/copilot/chat` instead of answering one prompt.
    #[arg(long)]
    pub server: bool,

    #[command(flatten)]
    pub config: BridgeConfig,

    /// Prompt words. Ignored in server mode.
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

/// What the process was asked to do.
#[derive(Debug)]
pub enum Mode {
    Serve(BridgeConfig),
    Once {
        config: BridgeConfig,
        prompt: Vec<String>,
    },
}

/// Splits the process arguments (program name first) into a [`Mode`].
///
/// # Errors
///
/// Returns the clap error for bad server flags or environment values, and
/// for `--help`/`--version` in server mode.
pub fn parse_args<I, T>(args: I) -> Result<Mode, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let bin = args.next().unwrap_or_else(|| "lmbridge".to_owned());
    let rest: Vec<String> = args.collect();

    if rest.iter().any(|arg| arg == SERVER_FLAG) {
        let cli = Cli::try_parse_from(std::iter::once(bin).chain(rest))?;
        return Ok(Mode::Serve(cli.config));
    }

    let cli = Cli::try_parse_from([bin])?;
    Ok(Mode::Once {
        config: cli.config,
        prompt: rest,
    })
}

/// Relays the prompt formed from `args` once and reports the outcome.
///
/// Writes the result as pretty-printed JSON to `out` and returns the exit
/// status: `0` on success, `1` on failure. With no arguments the usage line
/// goes to `err`, the relay is not called, and the status is `1`.
///
/// # Errors
///
/// Returns any I/O error from writing to `out` or `err`.
pub async fn run_once<W, E>(
    relay: &Relay,
    args: &[String],
    out: &mut W,
    err: &mut E,
) -> io::Result<u8>
where
    W: Write,
    E: Write,
{
    if args.is_empty() {
        writeln!(err, "{USAGE}")?;
        return Ok(1);
    }

    let request = ChatRequest::new(args.join(" "));
    let result = relay.run(&request).await;

    let json = serde_json::to_string_pretty(&result).map_err(io::Error::other)?;
    writeln!(out, "{json}")?;

    Ok(if result.is_success() { 0 } else { 1 })
}
