use crate::cmd::action::report_stats;
use crate::cmd::{connect, parse_duration, LinkArgs, RawArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_fields, OutputFormat};

pub fn run(args: RawArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let action = parse_action(&args.action)?;
    let timeout = parse_duration(&link.timeout)?;
    let comm = connect(link)?;

    let data = args.data.as_deref().map(str::as_bytes);
    let result = comm.do_raw_action(action, args.size, data, timeout);
    if let Ok(output) = &result {
        print_fields(&args.action, output, format);
    }
    if args.stats {
        report_stats(&comm, format);
    }
    result.map_err(|err| link_error("raw action failed", err))?;
    Ok(SUCCESS)
}

fn parse_action(input: &str) -> CliResult<[u8; 2]> {
    match input.as_bytes() {
        &[a, b] if input.is_ascii() => Ok([a, b]),
        _ => Err(CliError::new(
            USAGE,
            format!("action must be two ASCII characters, got {input:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_accepts_two_characters() {
        assert_eq!(parse_action("FV").unwrap(), *b"FV");
        assert_eq!(parse_action("el").unwrap(), *b"el");
    }

    #[test]
    fn parse_action_rejects_other_lengths() {
        assert_eq!(parse_action("F").unwrap_err().code, USAGE);
        assert_eq!(parse_action("FVX").unwrap_err().code, USAGE);
        assert_eq!(parse_action("é").unwrap_err().code, USAGE);
    }
}
