use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use core_affinity::CoreId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

use lbroker::core::constants;
use lbroker::peer::{run_demo_client, run_demo_worker};
use lbroker::{Broker, BrokerConfig, DispatchOutcome, DispatchStats};

/// Load-balancing request/reply broker.
#[derive(Parser, Debug)]
#[command(name = "lbroker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broker until SIGINT or SIGTERM.
    Serve(BrokerArgs),
    /// Run a bounded in-process demonstration with client and worker threads.
    Demo {
        #[command(flatten)]
        broker: BrokerArgs,
        /// Number of client threads, each sending one request.
        #[arg(long, default_value_t = 10)]
        clients: usize,
        /// Number of worker threads.
        #[arg(long, default_value_t = 3)]
        workers: usize,
    },
}

#[derive(Args, Debug)]
struct BrokerArgs {
    /// Client-facing listen address.
    #[arg(long, default_value_t = constants::DEFAULT_CLIENT_ADDR)]
    client_addr: SocketAddr,
    /// Worker-facing listen address.
    #[arg(long, default_value_t = constants::DEFAULT_WORKER_ADDR)]
    worker_addr: SocketAddr,
    /// Maximum number of idle workers held in the pool.
    #[arg(long, default_value_t = constants::DEFAULT_WORKER_CAPACITY)]
    capacity: usize,
    /// Pin the broker thread to this core.
    #[arg(long)]
    pin_core: Option<usize>,
}

impl BrokerArgs {
    fn config(&self) -> BrokerConfig {
        let mut config = BrokerConfig::get(self.client_addr, self.worker_addr, self.capacity);
        config.pin_core = self.pin_core;
        config
    }
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args.config()),
        Command::Demo {
            broker,
            clients,
            workers,
        } => demo(broker.config(), clients, workers),
    }
}

fn serve(config: BrokerConfig) -> Result<()> {
    let (broker, _) = spawn_broker(config)?;
    let (outcome, stats) = join_broker(broker)?;
    info!(?outcome, replies = stats.replies_relayed, "shutdown complete");
    Ok(())
}

fn demo(config: BrokerConfig, clients: usize, workers: usize) -> Result<()> {
    if clients == 0 {
        return Err(anyhow!("demo needs at least one client"));
    }
    if workers == 0 {
        return Err(anyhow!("demo needs at least one worker"));
    }

    let (broker, (client_addr, worker_addr)) =
        spawn_broker(config.with_message_limit(clients))?;

    let worker_handles: Vec<_> = (0..workers)
        .map(|i| thread::spawn(move || run_demo_worker(worker_addr, i)))
        .collect();
    let client_handles: Vec<_> = (0..clients)
        .map(|i| thread::spawn(move || run_demo_client(client_addr, i)))
        .collect();

    let (outcome, stats) = join_broker(broker)?;

    let mut answered = 0;
    for (i, h) in client_handles.into_iter().enumerate() {
        match h.join() {
            Ok(Ok(_)) => answered += 1,
            Ok(Err(e)) => warn!(client = i, error = %e, "client failed"),
            Err(_) => error!(client = i, "client thread panicked"),
        }
    }
    for (i, h) in worker_handles.into_iter().enumerate() {
        match h.join() {
            Ok(Ok(handled)) => info!(worker = i, handled, "worker finished"),
            Ok(Err(e)) => warn!(worker = i, error = %e, "worker failed"),
            Err(_) => error!(worker = i, "worker thread panicked"),
        }
    }

    info!(?outcome, answered, replies = stats.replies_relayed, "demo finished");
    if outcome != (DispatchOutcome::Completed { replies: clients as u64 }) {
        return Err(anyhow!("demo interrupted after {} replies", stats.replies_relayed));
    }
    Ok(())
}

type BrokerHandle = JoinHandle<Result<(DispatchOutcome, DispatchStats)>>;

/// Bind and run the broker on its own thread.
///
/// The ring is created on the thread that drives it; the bound addresses
/// are handed back once the listeners are up.
fn spawn_broker(config: BrokerConfig) -> Result<(BrokerHandle, (SocketAddr, SocketAddr))> {
    let core = config.pin_core.map(find_core).transpose()?;
    let (tx, rx) = mpsc::channel();

    let handle = thread::Builder::new()
        .name("broker".into())
        .spawn(move || {
            if let Some(core) = core {
                if core_affinity::set_for_current(core) {
                    info!(core = core.id, "broker pinned");
                } else {
                    warn!(core = core.id, "failed to pin broker thread");
                }
            }

            let broker = bind_broker(config)?;
            // the receiver only goes away if main already failed
            let _ = tx.send((broker.client_addr(), broker.worker_addr()));
            broker.run().context("broker failed")
        })
        .context("failed to spawn broker thread")?;

    match rx.recv() {
        Ok(addrs) => Ok((handle, addrs)),
        Err(_) => {
            // sender dropped without a value: binding failed
            join_broker(handle)?;
            Err(anyhow!("broker exited before binding"))
        }
    }
}

fn bind_broker(config: BrokerConfig) -> Result<Broker> {
    let (client_addr, worker_addr) = (config.client_addr, config.worker_addr);
    let broker = Broker::bind(config)
        .with_context(|| format!("failed to start broker on {client_addr} / {worker_addr}"))?;

    flag::register(SIGINT, broker.shutdown_flag()).context("failed to install SIGINT hook")?;
    flag::register(SIGTERM, broker.shutdown_flag()).context("failed to install SIGTERM hook")?;
    Ok(broker)
}

fn join_broker(handle: BrokerHandle) -> Result<(DispatchOutcome, DispatchStats)> {
    handle
        .join()
        .map_err(|_| anyhow!("broker thread panicked"))?
}

fn find_core(id: usize) -> Result<CoreId> {
    core_affinity::get_core_ids()
        .context("cannot enumerate cores")?
        .into_iter()
        .find(|core| core.id == id)
        .ok_or_else(|| anyhow!("no core with id {id}"))
}
