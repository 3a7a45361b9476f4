//! Author-side checks for puzzle scripts: compile, validate a guess, or render.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hunt::config::HuntConfig;
use hunt::runtime::{Runtime, RuntimeContext, RuntimeRegistry};
use log::debug;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "hunt-check", about = "Check puzzle runtimes and scripts", version)]
pub struct Cli {
    /// TOML config; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub instruction_limit: Option<u64>,
    #[arg(long)]
    pub memory_limit: Option<usize>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a script without running it.
    Check {
        #[arg(long, short)]
        runtime: Runtime,
        #[command(flatten)]
        script: Script,
    },
    /// Run a validator against a guess.
    Validate {
        #[arg(long, short)]
        runtime: Runtime,
        #[command(flatten)]
        script: Script,
        #[arg(long, short)]
        guess: String,
        /// JSON object visible as `team_data`.
        #[arg(long)]
        team_data: Option<String>,
        /// JSON object visible as `team_puzzle_data`.
        #[arg(long)]
        team_puzzle_data: Option<String>,
    },
    /// Render content and print it with any data the script wrote.
    Evaluate {
        #[arg(long, short)]
        runtime: Runtime,
        #[command(flatten)]
        script: Script,
        #[arg(long)]
        team_data: Option<String>,
        #[arg(long)]
        team_puzzle_data: Option<String>,
        #[arg(long)]
        user_data: Option<String>,
        #[arg(long)]
        user_puzzle_data: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Script {
    /// Script text.
    #[arg(long, short)]
    pub script: Option<String>,
    /// Read the script from a file.
    #[arg(long, short)]
    pub file: Option<PathBuf>,
}

impl Script {
    fn load(self) -> Result<String, Box<dyn std::error::Error>> {
        match (self.script, self.file) {
            (Some(text), _) => Ok(text),
            (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
            (None, None) => Err("a script or a script file is required".into()),
        }
    }
}

impl Cli {
    pub fn merge_into_config(&self, mut cfg: HuntConfig) -> HuntConfig {
        if let Some(v) = self.instruction_limit {
            cfg.sandbox.instruction_limit = v;
        }
        if let Some(v) = self.memory_limit {
            cfg.sandbox.memory_limit = v;
        }
        if let Some(v) = &self.log_level {
            cfg.log_level = v.clone();
        }
        cfg
    }
}

fn parse_blob(raw: Option<String>) -> Result<Option<Value>, serde_json::Error> {
    raw.map(|r| serde_json::from_str(&r)).transpose()
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let base = match &cli.config {
        Some(path) => HuntConfig::load(path)?,
        None => HuntConfig::default(),
    };
    let config = cli.merge_into_config(base);
    config.sandbox.validate()?;
    env_logger::Builder::new().parse_filters(&config.log_level).init();
    debug!("sandbox limits: {:?}", config.sandbox);

    let registry = RuntimeRegistry::new(config.sandbox);
    match cli.command {
        Command::Check { runtime, script } => {
            registry.check_script(runtime, &script.load()?)?;
            println!("ok");
        }
        Command::Validate { runtime, script, guess, team_data, team_puzzle_data } => {
            let ctx = RuntimeContext {
                team_data: parse_blob(team_data)?,
                team_puzzle_data: parse_blob(team_puzzle_data)?,
                ..RuntimeContext::default()
            };
            let correct = registry.validate_guess(runtime, &script.load()?, &guess, &ctx)?;
            println!("{}", if correct { "correct" } else { "incorrect" });
        }
        Command::Evaluate { runtime, script, team_data, team_puzzle_data, user_data, user_puzzle_data } => {
            let mut ctx = RuntimeContext {
                team_data: parse_blob(team_data)?,
                team_puzzle_data: parse_blob(team_puzzle_data)?,
                user_data: parse_blob(user_data)?,
                user_puzzle_data: parse_blob(user_puzzle_data)?,
                token: None,
            };
            let content = registry.evaluate(runtime, &script.load()?, &mut ctx)?;
            let report = json!({
                "content": content,
                "team_data": ctx.team_data,
                "team_puzzle_data": ctx.team_puzzle_data,
                "user_data": ctx.user_data,
                "user_puzzle_data": ctx.user_puzzle_data,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("hunt-check: {e}");
        std::process::exit(1);
    }
}
