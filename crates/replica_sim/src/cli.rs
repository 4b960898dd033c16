//! Command-line interface handling for the replication simulator.

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments. Everything except the config path overrides a
/// value from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of simulated peers
    pub peers: Option<usize>,
    /// Optional override for the number of ticks to run
    pub ticks: Option<u64>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    fn command() -> Command {
        Command::new("replica_sim")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Runs an in-process peer replication session")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("replica_sim.toml"),
            )
            .arg(
                Arg::new("peers")
                    .short('p')
                    .long("peers")
                    .value_name("COUNT")
                    .help("Number of simulated peers")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("ticks")
                    .short('t')
                    .long("ticks")
                    .value_name("COUNT")
                    .help("Number of ticks to run")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("replica_sim.toml")),
            peers: matches.get_one::<usize>("peers").copied(),
            ticks: matches.get_one::<u64>("ticks").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["replica_sim"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("replica_sim.toml"));
        assert_eq!(args.peers, None);
        assert_eq!(args.ticks, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "replica_sim",
            "-c",
            "custom.toml",
            "--peers",
            "4",
            "--ticks",
            "120",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.peers, Some(4));
        assert_eq!(args.ticks, Some(120));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_rejects_non_numeric_peers() {
        assert!(CliArgs::try_parse_from(["replica_sim", "--peers", "many"]).is_err());
    }
}
