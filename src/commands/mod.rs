use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use molcom::Position;

mod run;

use run::{RunOptions, run_check, run_simulation};

#[derive(Parser)]
#[command(
    name = "molcom",
    version,
    about = "Molecular communication nanonetwork simulator",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one simulation and print its summary
    Run {
        /// JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Override the RNG seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override the step budget
        #[arg(long)]
        max_steps: Option<u64>,
        /// Keep stepping after the stop condition until every molecule has settled
        #[arg(long, action = ArgAction::SetTrue)]
        drain: bool,
        /// Override the medium extents: x,y,z
        #[arg(long, value_name = "x,y,z")]
        medium: Option<ExtentsArg>,
        /// Disable occupancy collisions
        #[arg(long = "no-collisions", action = ArgAction::SetFalse, default_value_t = true)]
        collisions: bool,
        /// Write the run summary as JSON
        #[arg(long)]
        stats_out: Option<PathBuf>,
        /// Write a snapshot of the medium at the final step as JSON
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
    },
    /// Validate a configuration file without running it
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct ExtentsArg(pub Position);

impl FromStr for ExtentsArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.trim().split(',').collect();
        if parts.len() != 3 {
            return Err("medium must be formatted as x,y,z".into());
        }
        let mut values = [0i32; 3];
        for (slot, (axis, raw)) in values.iter_mut().zip(["x", "y", "z"].iter().zip(parts)) {
            *slot = raw
                .trim()
                .parse::<i32>()
                .map_err(|_| format!("{axis} must be an integer"))?;
        }
        Ok(ExtentsArg(Position::new(values[0], values[1], values[2])))
    }
}

/// `Info` everywhere, `Debug` for this crate; `RUST_LOG` overrides both.
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("molcom"), LevelFilter::Debug)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

pub fn run() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli.command) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Run {
            config,
            seed,
            max_steps,
            drain,
            medium,
            collisions,
            stats_out,
            snapshot_out,
        } => run_simulation(RunOptions {
            config,
            seed,
            max_steps,
            drain,
            medium: medium.map(|m| m.0),
            collisions,
            stats_out,
            snapshot_out,
        }),
        Command::Check { config } => run_check(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_parse() {
        let arg: ExtentsArg = "10, 20,30".parse().unwrap();
        assert_eq!(arg.0, Position::new(10, 20, 30));
        assert!("10,20".parse::<ExtentsArg>().is_err());
        assert!("a,2,3".parse::<ExtentsArg>().is_err());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "molcom",
            "run",
            "--config",
            "sim.json",
            "--seed",
            "9",
            "--drain",
            "--no-collisions",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                seed,
                drain,
                collisions,
                ..
            } => {
                assert_eq!(seed, Some(9));
                assert!(drain);
                assert!(!collisions);
            }
            Command::Check { .. } => panic!("expected run"),
        }
    }
}
