//! # mqtt-maison
//!
//! Bridge between zigbee2mqtt remote controls and maison actions.
//!
//! ## Workers
//!
//! 1. **Remote**: maps raw remote events to canonical actions and publishes
//!    them on the application topic; the `toggle` command flips the target
//!    device instead
//! 2. **Actions**: drives devices from the envelopes on the application topic
//!    and optionally logs every one of them

use anyhow::{bail, Result};
use mqtt_maison_core::ActionMap;
use std::env;
use std::fmt::Write as _;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod monitor;
mod remote;
mod runtime;

pub use config::MaisonConfig;
pub use runtime::Bridge;

/// Command line subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Run the bridge
    Mqtt,
    /// Print the remote action table
    Actions,
    /// Resolve one raw remote action
    Map(String),
    /// Print usage; carries the offending input when there was one
    Help(Option<String>),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let command = match args.get(1).map(String::as_str) {
            Some("mqtt") => Self::Mqtt,
            Some("actions") => Self::Actions,
            Some("map") => match args.get(2) {
                Some(raw) => Self::Map(raw.clone()),
                None => bail!("Usage: mqtt-maison map <raw-action>"),
            },
            Some("help" | "-h" | "--help") | None => Self::Help(None),
            Some(other) => Self::Help(Some(other.to_string())),
        };
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    match Command::parse(&args)? {
        Command::Mqtt => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting mqtt-maison");
            let config = MaisonConfig::from_env()?;
            Bridge::new(config).run().await?;
        }
        Command::Actions => print!("{}", actions_table(&ActionMap::symfonisk())),
        Command::Map(raw) => println!("{}", map_line(&ActionMap::symfonisk(), &raw)),
        Command::Help(unknown) => {
            if let Some(command) = unknown {
                eprintln!("Unknown command '{command}'\n");
            }
            print_help();
        }
    }

    Ok(())
}

fn actions_table(actions: &ActionMap) -> String {
    let mut table = String::new();
    for (raw, action) in actions.entries() {
        let _ = writeln!(table, "{raw:<24} {action}");
    }
    table
}

fn map_line(actions: &ActionMap, raw: &str) -> String {
    match actions.resolve(raw) {
        Some(action) => action.to_string(),
        None => format!("no mapping for '{raw}'"),
    }
}

fn print_help() {
    println!(
        r"mqtt-maison

USAGE:
    mqtt-maison <COMMAND>

COMMANDS:
    mqtt              Run the bridge against the configured broker
    actions           List the remote action table
    map <raw-action>  Show the maison action for a raw remote action

ENVIRONMENT:
    mqtt_server, mqtt_user, mqtt_password   Broker access (required by mqtt)
    MAISON_DISPATCH_ACTIONS                 Drive devices from actions (default: true)
    MAISON_MONITOR_ACTIONS                  Log every maison action (default: false)
    RUST_LOG                                Log filter (default: info)
"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("mqtt-maison")
            .chain(values.iter().copied())
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse(&args(&["mqtt"])).unwrap(), Command::Mqtt);
        assert_eq!(Command::parse(&args(&["actions"])).unwrap(), Command::Actions);
        assert_eq!(
            Command::parse(&args(&["map", "volume_up"])).unwrap(),
            Command::Map("volume_up".to_string())
        );
        assert_eq!(Command::parse(&args(&[])).unwrap(), Command::Help(None));
        assert_eq!(Command::parse(&args(&["--help"])).unwrap(), Command::Help(None));
    }

    #[test]
    fn unknown_command_shows_help() {
        assert_eq!(
            Command::parse(&args(&["serve"])).unwrap(),
            Command::Help(Some("serve".to_string()))
        );
    }

    #[test]
    fn map_requires_raw_action() {
        let err = Command::parse(&args(&["map"])).unwrap_err();

        assert!(err.to_string().contains("map <raw-action>"));
    }

    #[test]
    fn map_output() {
        let actions = ActionMap::symfonisk();

        assert_eq!(map_line(&actions, "volume_up"), "up");
        assert_eq!(map_line(&actions, "dots_2_double_press"), "dots_double");
        assert_eq!(map_line(&actions, "nope"), "no mapping for 'nope'");
    }

    #[test]
    fn actions_table_lists_every_entry() {
        let actions = ActionMap::symfonisk();

        let table = actions_table(&actions);

        assert_eq!(table.lines().count(), actions.entries().len());
        assert!(table
            .lines()
            .any(|line| line.starts_with("toggle ") && line.ends_with(" main")));
    }
}
