use std::{env, process::ExitCode, time::Duration};

use anyhow::{bail, Context};
use tracing::{error, info};

use botbattles::{
    bots_manager::{spawn_bots, BotsManager, SpawnRequest},
    configuration::Configuration,
    logger::init_logger,
    worker::{is_worker_process, worker_main},
};

const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const USAGE: &str = "usage: botbattles <server> <session_id> <agent> <count> [terminate_timeout_secs]";

/// Spawns bots and runs them until they all finish or the runner is interrupted.
fn main() -> ExitCode {
    if is_worker_process() {
        return worker_main();
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

struct Args {
    server: String,
    session_id: String,
    agent: String,
    count: usize,
    terminate_timeout: Duration,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = env::args().skip(1);
    let (Some(server), Some(session_id), Some(agent), Some(count)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        bail!(USAGE);
    };
    let count = count.parse().context("count must be a number")?;
    let terminate_timeout = match args.next() {
        Some(secs) => Duration::from_secs_f64(
            secs.parse()
                .context("terminate_timeout_secs must be a number")?,
        ),
        None => DEFAULT_TERMINATE_TIMEOUT,
    };
    if args.next().is_some() {
        bail!(USAGE);
    }
    Ok(Args {
        server,
        session_id,
        agent,
        count,
        terminate_timeout,
    })
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    let configuration = Configuration::from_env();
    init_logger(&configuration, "runner")?;

    let request = SpawnRequest::new(&args.server, &args.session_id, &args.agent)?
        .with_configuration(configuration);
    let mut bots = spawn_bots(&request, args.count)?;
    info!("{} bot(s) running, press Ctrl+C to stop", bots.len());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not build the runner runtime")?;
    runtime.block_on(async {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => match interrupted {
                Ok(()) => info!("interrupted, stopping bots"),
                Err(e) => error!("could not listen for Ctrl+C: {e}"),
            },
            () = all_finished(&mut bots) => info!("every bot is finished"),
        }
    });

    bots.terminate(args.terminate_timeout);
    Ok(())
}

async fn all_finished(bots: &mut BotsManager) {
    while bots.running() > 0 {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
