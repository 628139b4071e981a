use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use mastercomm_link::BackgroundConsumer;
use mastercomm_protocol::api;

use crate::cmd::{connect, install_ctrlc_handler, LinkArgs, ListenArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_fields, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Output events are sent unsolicited, always with cid 0.
const EVENT_CID: u8 = 0;

pub fn run(args: ListenArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let comm = connect(link)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let spec = Arc::new(api::output_list());
    let action = spec.action_name();
    let (tx, rx) = mpsc::channel();
    let mut consumer = BackgroundConsumer::new(spec, EVENT_CID, move |fields| {
        let _ = tx.send(fields.clone());
    })
    .map_err(|err| link_error("consumer setup failed", err))?;
    comm.register_consumer(&consumer);

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) && comm.is_running() {
        let fields = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(fields) => fields,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_fields(&action, &fields, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    consumer.stop();
    comm.stop();
    Ok(SUCCESS)
}
