// ABOUTME: Interactive bootstrap for the fleetd configuration file.
// ABOUTME: Prompts for worker command, database path, and socket directory, then saves TOML.

use anyhow::{Context, Result};
use fleet_core::Config;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, message: &str, default: &str) -> Result<String> {
    write!(out, "{} [{}]: ", message, default)?;
    out.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(line.to_string())
    }
}

/// Ask for each setting, using the existing file (or defaults) as the suggestions.
pub fn build_config<R: BufRead, W: Write>(input: &mut R, out: &mut W, base: Config) -> Result<Config> {
    let mut config = base;

    config.worker.command = prompt(input, out, "Worker command", &config.worker.command)?;
    let args = prompt(input, out, "Worker arguments", &config.worker.args.join(" "))?;
    config.worker.args = args.split_whitespace().map(String::from).collect();

    let working_dir = config.worker.working_dir.clone().unwrap_or_default();
    let working_dir = prompt(input, out, "Worker working directory (blank for current)", &working_dir)?;
    config.worker.working_dir = Some(working_dir).filter(|d| !d.is_empty());

    config.database_path = prompt(input, out, "Session database", &config.database_path)?;

    let socket_dir = config
        .socket_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().display().to_string());
    config.socket_dir = Some(prompt(input, out, "Worker socket directory", &socket_dir)?);

    let redis = prompt(input, out, "Clear redis session keys? (y/n)", if config.ephemeral.enabled { "y" } else { "n" })?;
    config.ephemeral.enabled = redis.eq_ignore_ascii_case("y") || redis.eq_ignore_ascii_case("yes");

    Ok(config)
}

pub fn run_init(path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    println!("fleetd initialization\n");

    let existing = Config::load_or_default(&path)?;
    let stdin = io::stdin();
    let config = build_config(&mut stdin.lock(), &mut io::stdout(), existing)?;

    config
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("\nWrote {}", path.display());
    println!("Start the daemon with: fleetd serve --config {}", path.display());
    Ok(())
}
