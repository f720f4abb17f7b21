mod args;

use anyhow::Context;
use args::Args;
use clap::Parser;
use extender_bridge::dispatch::Dispatcher;
use extender_bridge::memory::ProcMemory;
use extender_bridge::transport::{BridgeClient, BridgeServer, ExchangeTracer};
use log::{info, warn};
use std::sync::{mpsc, Arc};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(line) = &args.send {
        let response = BridgeClient::new(&args.pipe_name).send_line(line)?;
        println!("{response}");
        return Ok(());
    }

    let tracer = match &args.log_file {
        Some(path) if args.trace => Some(ExchangeTracer::create(path)?),
        _ => None,
    };
    if args.trace && tracer.is_none() {
        warn!(target: "bridge", "--trace requires --log-file; tracing disabled");
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ProcMemory)));
    let mut server = BridgeServer::new(args.pipe_name.clone()).with_handler(dispatcher);
    if let Some(tracer) = tracer {
        server = server.with_tracer(tracer);
    }
    let mut handle = server
        .start()
        .with_context(|| format!("start bridge on channel '{}'", args.pipe_name))?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        _ = shutdown_tx.send(());
    })
    .context("install signal handler")?;

    info!(target: "bridge", "extender bridge ready, press Ctrl-C to stop");
    _ = shutdown_rx.recv();

    info!(target: "bridge", "shutting down");
    handle.stop();
    Ok(())
}
