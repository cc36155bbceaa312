// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! flux: front-end plumbing for the execution control plane.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod config;
mod job;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flux", version, about = "Flux job execution control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Job manipulation commands
    #[command(subcommand)]
    Job(job::JobCmd),
    /// Configuration access
    #[command(subcommand)]
    Config(config::ConfigCmd),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Job(cmd) => job::run(cmd).await,
        Command::Config(cmd) => config::run(cmd),
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("flux: {e:#}");
            std::process::exit(1);
        }
    }
}
