use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mastercomm::service::PassthroughService;

use crate::cmd::{connect, install_ctrlc_handler, open_link, LinkArgs, PassthroughArgs};
use crate::exit::{link_error, CliResult, SUCCESS};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(args: PassthroughArgs, link: &LinkArgs) -> CliResult<i32> {
    let client = open_link(&args.device, args.device_baud)?;
    let comm = connect(link)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut service = PassthroughService::new(Arc::clone(&comm), client).verbose(args.verbose);
    service
        .start()
        .map_err(|err| link_error("passthrough failed", err))?;

    while running.load(Ordering::SeqCst) && service.is_running() && comm.is_running() {
        thread::sleep(POLL_INTERVAL);
    }

    service.stop();
    comm.stop();
    Ok(SUCCESS)
}
