// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The `weave` node.

mod cli;
mod config;
mod error;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};
use weave::{
    db::{KvStore, MemoryStore},
    ledger::Ledger,
    storage::Storage,
    tangle::{MilestoneSolidifier, RequestQueue, Tangle},
    types::{block::BlockId, tangle::MilestoneIndex},
};

use self::{cli::ClArgs, config::SnapshotConfig, error::Error};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    set_up_logging();

    std::panic::set_hook(Box::new(|p| {
        error!("{}", p);
    }));

    if let Err(e) = run().await {
        error!("{}", e);
    }
}

fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

async fn run() -> Result<(), Error> {
    let cl_args = ClArgs::parse();
    let config = cl_args.get_config()?;

    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let storage = Arc::new(Storage::new(store, &config.cache)?);
    load_snapshot(&storage, &config.snapshot)?;

    let tangle = Arc::new(Tangle::new(
        storage.clone(),
        Arc::new(RequestQueue::new()),
        config.tangle.clone(),
    )?);
    let solidifier = MilestoneSolidifier::spawn(tangle.clone())?;
    tangle.trigger_milestone_solidification(MilestoneIndex(0), false);

    let flush = tokio::spawn(flush_periodically(storage.clone(), config.cache.flush_interval));
    info!(
        "Node started at milestone {} with {} solid entry points.",
        tangle.sync().confirmed_milestone_index(),
        storage.solid_entry_points().len()
    );

    let signal = shutdown_signal_listener().await;
    info!("Shutting down.");

    flush.abort();
    let solidifier = solidifier.shutdown().await;
    storage.shutdown()?;
    signal?;
    solidifier?;
    Ok(())
}

/// Seeds an empty store with the ledger index and the solid entry points of the snapshot.
fn load_snapshot(storage: &Storage, snapshot: &SnapshotConfig) -> Result<(), Error> {
    let ledger = Ledger::new(storage.store().clone())?;
    if ledger.ledger_index() != 0 {
        debug!("Store already contains a ledger, skipping the snapshot.");
        return Ok(());
    }

    let mut entry_points = Vec::with_capacity(snapshot.entry_points.len());
    for entry_point in &snapshot.entry_points {
        let block_id = entry_point
            .parse::<BlockId>()
            .map_err(|e| Error::EntryPoint(entry_point.clone(), e))?;
        entry_points.push(block_id);
    }
    {
        let mut solid_entry_points = storage.solid_entry_points_mut();
        for block_id in entry_points {
            solid_entry_points.add(block_id, snapshot.index);
        }
    }
    storage.store_solid_entry_points()?;
    storage.store_protocol_parameters(&snapshot.protocol)?;
    ledger.write().import_unspent_outputs(&[], snapshot.index)?;
    info!("Loaded snapshot at milestone {}.", snapshot.index);
    Ok(())
}

async fn flush_periodically(storage: Arc<Storage>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    loop {
        interval.tick().await;
        let storage = storage.clone();
        match tokio::task::spawn_blocking(move || storage.flush()).await {
            Ok(Ok(())) => debug!("Flushed object caches."),
            Ok(Err(e)) => error!("Failed to flush object caches: {e}"),
            Err(e) => error!("Flush task failed: {e}"),
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal_listener() -> Result<(), std::io::Error> {
    use futures::future;
    use tokio::signal::unix::{signal, Signal, SignalKind};

    let mut signals = [SignalKind::interrupt(), SignalKind::terminate()]
        .into_iter()
        .map(signal)
        .collect::<Result<Vec<Signal>, _>>()?;
    let signal_futs = signals.iter_mut().map(|signal| Box::pin(signal.recv()));
    let (signal_event, _, _) = future::select_all(signal_futs).await;

    if signal_event.is_none() {
        error!("Shutdown signal stream failed, channel may have closed.");
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal_listener() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await
}
