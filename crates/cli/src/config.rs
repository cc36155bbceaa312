// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `flux config` plumbing. Config loading itself lives outside the
//! core; this just reads the instance config document and prints it
//! (or a dotted sub-path of it).

use anyhow::{Context, Result};
use clap::Subcommand;
use flux_core::jpath;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print the instance configuration (optionally one dotted path)
    Get {
        path: Option<String>,
        /// Config document location (default `$FLUX_CONF`)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub fn run(cmd: ConfigCmd) -> Result<i32> {
    match cmd {
        ConfigCmd::Get { path, file } => get(path.as_deref(), file),
    }
}

fn get(path: Option<&str>, file: Option<PathBuf>) -> Result<i32> {
    let file = file
        .or_else(|| std::env::var("FLUX_CONF").ok().map(PathBuf::from))
        .context("no config file: set FLUX_CONF or pass --file")?;
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let config: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let value = match path {
        None => &config,
        Some(path) => match jpath::get(&config, path) {
            Ok(v) => v,
            Err(_) => {
                eprintln!("flux-config: {path} is not set");
                return Ok(1);
            }
        },
    };
    match value {
        Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
    Ok(0)
}
