mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, LinkArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mastercomm", version, about = "Master controller link CLI")]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `MASTERCOMM_LOG` directives take precedence.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.link, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action_subcommand() {
        let cli = Cli::try_parse_from([
            "mastercomm",
            "--port",
            "/dev/ttyO5",
            "action",
            "1",
            "2",
            "--stats",
        ])
        .expect("action args should parse");

        assert_eq!(cli.link.port.as_deref(), Some("/dev/ttyO5"));
        match cli.command {
            Command::Action(args) => {
                assert_eq!((args.action_type, args.action_number), (1, 2));
                assert!(args.stats);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn port_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mastercomm",
            "listen",
            "--port",
            "unix:/tmp/master.sock",
            "--count",
            "3",
        ])
        .expect("listen args should parse");
        assert_eq!(cli.link.port.as_deref(), Some("unix:/tmp/master.sock"));
        assert!(matches!(cli.command, Command::Listen(_)));
    }

    #[test]
    fn rejects_out_of_range_action_number() {
        let err = Cli::try_parse_from(["mastercomm", "action", "1", "256"])
            .expect_err("action number must fit in a byte");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_raw_subcommand() {
        let cli = Cli::try_parse_from([
            "mastercomm",
            "raw",
            "FV",
            "13",
            "--data",
            "hi",
            "--timeout",
            "500ms",
        ])
        .expect("raw args should parse");
        assert!(matches!(cli.command, Command::Raw(_)));
        assert_eq!(cli.link.timeout, "500ms");
    }
}
