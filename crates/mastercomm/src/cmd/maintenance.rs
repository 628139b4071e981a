use std::io::{self, BufRead, Write};

use mastercomm::service::MaintenanceSession;

use crate::cmd::{connect, parse_duration, LinkArgs, MaintenanceArgs};
use crate::exit::{io_error, link_error, CliResult, SUCCESS};

pub fn run(args: MaintenanceArgs, link: &LinkArgs) -> CliResult<i32> {
    let idle_timeout = parse_duration(&args.idle_timeout)?;
    let comm = connect(link)?;

    let mut session = MaintenanceSession::activate(comm.clone(), idle_timeout, |line| {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    })
    .map_err(|err| link_error("maintenance mode failed", err))?;

    for line in io::stdin().lock().lines() {
        let line = line.map_err(|err| io_error("stdin read failed", err))?;
        if !session.is_active() {
            break;
        }
        session
            .write(&line)
            .map_err(|err| link_error("maintenance write failed", err))?;
    }

    session.deactivate();
    comm.stop();
    Ok(SUCCESS)
}
