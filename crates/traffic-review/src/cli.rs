use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use traffic_review_client::StreamSource;

#[derive(Debug, Default)]
pub struct CliSources {
    pub step_frames_from_cli: bool,
    pub frame_poll_from_cli: bool,
    pub position_poll_from_cli: bool,
    pub stats_poll_from_cli: bool,
}

impl CliSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            step_frames_from_cli: value_from_cli(matches, "step_frames"),
            frame_poll_from_cli: value_from_cli(matches, "frame_poll_ms"),
            position_poll_from_cli: value_from_cli(matches, "position_poll_ms"),
            stats_poll_from_cli: value_from_cli(matches, "stats_poll_ms"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "traffic-review",
    about = "Review and scrub a remote vehicle-detection stream",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Detection service backend (http, mock)
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Base URL of the detection service
    #[arg(long = "url")]
    pub url: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Print the list of available service backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// Frames moved by one step forward or back
    #[arg(
        long = "step-frames",
        id = "step_frames",
        default_value_t = 30,
        value_parser = parse_positive_u64
    )]
    pub step_frames: u64,

    /// Frame polling period in milliseconds
    #[arg(
        long = "frame-poll-ms",
        id = "frame_poll_ms",
        default_value_t = 100,
        value_parser = parse_positive_u64
    )]
    pub frame_poll_ms: u64,

    /// Position polling period in milliseconds
    #[arg(
        long = "position-poll-ms",
        id = "position_poll_ms",
        default_value_t = 1000,
        value_parser = parse_positive_u64
    )]
    pub position_poll_ms: u64,

    /// Detection stats polling period in milliseconds
    #[arg(
        long = "stats-poll-ms",
        id = "stats_poll_ms",
        default_value_t = 1000,
        value_parser = parse_positive_u64
    )]
    pub stats_poll_ms: u64,

    /// Tracing filter directive, e.g. `traffic_review=debug`
    #[arg(long = "log-filter")]
    pub log_filter: Option<String>,

    /// Start detection on this source right away (camera index or video path)
    #[arg(value_parser = parse_source)]
    pub source: Option<StreamSource>,
}

impl CliArgs {
    /// Arguments as if none were given on the command line.
    pub fn defaults() -> Self {
        Self {
            backend: None,
            url: None,
            config: None,
            list_backends: false,
            step_frames: 30,
            frame_poll_ms: 100,
            position_poll_ms: 1000,
            stats_poll_ms: 1000,
            log_filter: None,
            source: None,
        }
    }
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|_| format!("'{value}' is not a valid number"))?;
    if parsed == 0 {
        return Err("value must be at least 1".into());
    }
    Ok(parsed)
}

fn parse_source(value: &str) -> Result<StreamSource, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> (CliArgs, CliSources) {
        let matches = CliArgs::command()
            .try_get_matches_from(args)
            .expect("arguments parse");
        let cli = CliArgs::from_arg_matches(&matches).expect("arguments map");
        (cli, CliSources::from_matches(&matches))
    }

    #[test]
    fn defaults_are_not_marked_as_cli_values() {
        let (cli, sources) = parse(&["traffic-review"]);
        assert_eq!(cli.step_frames, 30);
        assert_eq!(cli.frame_poll_ms, 100);
        assert!(!sources.step_frames_from_cli);
        assert!(!sources.frame_poll_from_cli);
        assert!(!sources.position_poll_from_cli);
        assert!(!sources.stats_poll_from_cli);
    }

    #[test]
    fn explicit_values_are_tracked() {
        let (cli, sources) = parse(&["traffic-review", "--step-frames", "15", "-b", "mock", "2"]);
        assert_eq!(cli.step_frames, 15);
        assert_eq!(cli.backend.as_deref(), Some("mock"));
        assert_eq!(cli.source, Some(StreamSource::Camera(2)));
        assert!(sources.step_frames_from_cli);
        assert!(!sources.frame_poll_from_cli);
    }

    #[test]
    fn stats_period_is_tracked_separately() {
        let (cli, sources) = parse(&["traffic-review", "--stats-poll-ms", "2000"]);
        assert_eq!(cli.stats_poll_ms, 2000);
        assert!(sources.stats_poll_from_cli);
        assert!(!sources.position_poll_from_cli);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(parse_positive_u64("0").is_err());
        assert!(parse_positive_u64("abc").is_err());
        assert_eq!(parse_positive_u64("250"), Ok(250));
    }
}
