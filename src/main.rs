mod config;
mod error;
mod packet;
mod ping;
mod report;
mod session;
mod stats;
mod util;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use config::Config;
use packet::ECHO_PACKET_LEN;
use ping::Pinger;
use session::{Finish, Outcome, Sequences, Session};

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let matches = config::app().get_matches();
    let code = match Config::from_matches(&matches).and_then(|config| run(&config)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ping: {:#}", e);
            1
        }
    };
    process::exit(code);
}

fn run(config: &Config) -> Result<()> {
    report::configure_colors(config.color);

    let destination = util::resolve_dest(&config.hostname, config.ip)
        .with_context(|| format!("cannot resolve {}", config.hostname))?;

    // Identifier word shared by all our requests, replies carrying another one belong to someone else
    let identifier = process::id() as u16;
    let pinger = Pinger::open(destination, identifier, config.ttl)
        .context("failed to open raw ICMP socket (are you root?)")?;
    debug!("pinging {} as {:?} with identifier {:#06x}", pinger.destination(), pinger.family(), identifier);

    // Raised by Ctrl-C, polled between and during round trips
    let cancel = Arc::new(AtomicBool::new(false));
    let c = cancel.clone();
    ctrlc::set_handler(move || {
        c.store(true, Ordering::SeqCst);
    }).context("error setting Ctrl-C handler")?;

    println!("{}", report::greeting(&config.hostname, destination, ECHO_PACKET_LEN));

    let mut session = Session::new(pinger, config.timeout);
    let verbose = config.verbosity > 0;
    let finish = session.run(Sequences::new(config.count), config.interval, &cancel, |outcome| {
        match outcome {
            Outcome::Completed(reply) => {
                println!("{}", report::reply_line(reply));
                if verbose {
                    println!("{}", report::verbose_block(reply));
                }
            }
            Outcome::Lost(sequence) => println!("{}", report::lost_line(*sequence)),
        }
    })?;

    debug!("run ended ({:?}) with last round trip {:?}", finish, session.phase());
    if finish == Finish::Interrupted {
        println!();
    }
    println!("{}", report::summary(&config.hostname, &session.stats()));
    Ok(())
}
