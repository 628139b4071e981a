use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use mastercomm_link::{CommunicatorConfig, MasterCommunicator};
use mastercomm_transport::{LinkStream, SerialConfig, DEFAULT_BAUD_RATE};

use crate::exit::{link_error, transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod action;
pub mod listen;
pub mod maintenance;
pub mod passthrough;
pub mod raw;
pub mod version;

/// Prefix selecting a socket-bridged master instead of a TTY.
const UNIX_PREFIX: &str = "unix:";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a basic action on the master.
    Action(ActionArgs),
    /// Send an ad hoc command and print the raw response bytes.
    Raw(RawArgs),
    /// Print output status events as the master sends them.
    Listen(ListenArgs),
    /// Bridge a second serial link to the master.
    Passthrough(PassthroughArgs),
    /// Open the master's command line interface on stdin/stdout.
    Maintenance(MaintenanceArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Action(args) => action::run(args, link, format),
        Command::Raw(args) => raw::run(args, link, format),
        Command::Listen(args) => listen::run(args, link, format),
        Command::Passthrough(args) => passthrough::run(args, link),
        Command::Maintenance(args) => maintenance::run(args, link),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the master.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Serial device of the master, or `unix:<path>` for a socket bridge.
    #[arg(long, env = "MASTERCOMM_PORT", global = true)]
    pub port: Option<String>,
    /// Serial line speed.
    #[arg(long, env = "MASTERCOMM_BAUD", default_value_t = DEFAULT_BAUD_RATE, global = true)]
    pub baud: u32,
    /// Command timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s", global = true)]
    pub timeout: String,
    /// Skip the input flush that resets the master on startup.
    #[arg(long, global = true)]
    pub no_init: bool,
}

#[derive(Args, Debug)]
pub struct ActionArgs {
    /// Action type.
    pub action_type: u8,
    /// Action number.
    pub action_number: u8,
    /// Extra parameter byte.
    #[arg(long)]
    pub parameter: Option<u8>,
    /// Print communication statistics afterwards.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct RawArgs {
    /// Two-character action code.
    pub action: String,
    /// Number of response data bytes.
    pub size: usize,
    /// Request payload; 13 bytes of padding when omitted.
    #[arg(long)]
    pub data: Option<String>,
    /// Print communication statistics afterwards.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PassthroughArgs {
    /// Serial device of the passthrough client, or `unix:<path>`.
    pub device: String,
    /// Line speed of the passthrough client.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub device_baud: u32,
    /// Log every forwarded chunk.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct MaintenanceArgs {
    /// Close the session after this long without input (e.g. 600s).
    #[arg(long, default_value = "600s")]
    pub idle_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open the link and start a communicator on it.
pub fn connect(args: &LinkArgs) -> CliResult<Arc<MasterCommunicator>> {
    let port = args
        .port
        .as_deref()
        .ok_or_else(|| CliError::new(USAGE, "--port (or MASTERCOMM_PORT) is required"))?;
    let link = open_link(port, args.baud)?;

    let config = CommunicatorConfig {
        command_timeout: parse_duration(&args.timeout)?,
        init_master: !args.no_init,
        ..CommunicatorConfig::default()
    };
    let comm = MasterCommunicator::new(link, config);
    comm.start().map_err(|err| link_error("start failed", err))?;
    Ok(Arc::new(comm))
}

pub fn open_link(port: &str, baud: u32) -> CliResult<LinkStream> {
    let link = match port.strip_prefix(UNIX_PREFIX) {
        Some(path) => LinkStream::connect_unix(path),
        None => LinkStream::open_serial(&SerialConfig {
            baud_rate: baud,
            ..SerialConfig::new(port)
        }),
    };
    link.map_err(|err| transport_error("open failed", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("bad").unwrap_err().code, USAGE);
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn connect_requires_port() {
        let args = LinkArgs {
            port: None,
            baud: DEFAULT_BAUD_RATE,
            timeout: "2s".into(),
            no_init: true,
        };
        assert_eq!(connect(&args).err().map(|err| err.code), Some(USAGE));
    }

    #[test]
    fn missing_socket_is_reported() {
        let err = open_link("unix:/tmp/mastercomm-no-such.sock", DEFAULT_BAUD_RATE).unwrap_err();
        assert!(err.message.starts_with("open failed"));
    }
}
