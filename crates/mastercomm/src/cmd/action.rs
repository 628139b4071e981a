use mastercomm_link::MasterCommunicator;
use mastercomm_protocol::{api, Fields};

use crate::cmd::{connect, ActionArgs, LinkArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_stats, OutputFormat};

pub fn run(args: ActionArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let comm = connect(link)?;

    let mut fields = Fields::new()
        .with("action_type", args.action_type)
        .with("action_number", args.action_number);
    let spec = match args.parameter {
        Some(parameter) => {
            fields.insert("parameter", parameter);
            api::basic_action_with_parameter()
        }
        None => api::basic_action(),
    };

    let result = comm.do_command(&spec, &fields);
    if let Ok(output) = &result {
        print_fields(&spec.action_name(), output, format);
    }
    if args.stats {
        report_stats(&comm, format);
    }
    result.map_err(|err| link_error("command failed", err))?;
    Ok(SUCCESS)
}

pub(crate) fn report_stats(comm: &MasterCommunicator, format: OutputFormat) {
    print_stats(
        &comm.get_communication_statistics(),
        &comm.get_command_histograms(),
        format,
    );
}
