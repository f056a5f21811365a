//! Echo Bot Demo
//!
//! Runs the Cobalt host against a console client: every stdin line becomes
//! an inbound message, every reply is printed.
//!
//! # Usage
//!
//! ```bash
//! cd demos/echo_bot
//! cargo run --package echo-bot
//! ```
//!
//! Then, as the configured master:
//!
//! ```text
//! p 10001 #cobalt -c on -p echo
//! g 500 7 /echo hello
//! p 10001 #cobalt -c list
//! ```

mod console;
mod echo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cobalt::prelude::*;
use tokio::sync::mpsc;
use tracing::info;

use crate::console::{ConsoleClient, read_stdin};

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "Cobalt echo bot on the console")]
struct Args {
    /// Configuration file. Searched in the current directory when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(long)]
    profile: Option<String>,

    /// Sender of lines without an explicit `p`/`g` header.
    #[arg(short, long, default_value_t = 10001)]
    user: i64,
}

const SELF_ID: i64 = 20000;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = CobaltRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }

    let client = Arc::new(ConsoleClient::new(SELF_ID));
    let runtime = builder.build(client)?;
    info!(
        masters = ?runtime.config().bot.masters,
        command = %runtime.config().bot.command,
        "Type messages below; Ctrl+C or EOF to quit"
    );

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(read_stdin(tx, args.user, SELF_ID));

    runtime.run(rx).await?;
    Ok(())
}
