use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{info, warn};

use gatt_central::config::central_config::CONFIG_FILE_NAME;
use gatt_central::core::bluetooth::{BluestRadio, SessionHandle, DEFAULT_PLACEHOLDER_NAME};
use gatt_central::core::{StandardCharacteristic, StandardPolicy, StandardService};
use gatt_central::{
    init_logging, CentralConfig, CharacteristicCatalog, DiscoveryManager, IdentityStore,
    JsonFileStore, ManagerHandle, MemoryStore,
};

/// How long to wait for the last known peripheral before scanning instead
const RECONNECT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = CentralConfig::load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(config.level_filter());

    let store: Arc<dyn IdentityStore> = match &config.store_path {
        Some(path) => Arc::new(JsonFileStore::open(path).await),
        None => Arc::new(MemoryStore::new()),
    };
    let remembered = store.get(&config.last_known_key).is_some() && config.reconnect_on_ready;

    let (radio, events) = BluestRadio::with_channel();
    let manager =
        DiscoveryManager::<StandardService>::new(Arc::new(radio), Arc::new(StandardPolicy), store, config);
    let (handle, task) = manager.spawn(events);
    handle.power_on()?;

    tokio::select! {
        result = run(&handle, remembered) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down."),
    }

    handle.shutdown();
    task.await?;
    Ok(())
}

async fn run(handle: &ManagerHandle<StandardCharacteristic>, remembered: bool) -> Result<()> {
    let observer = handle.observer().clone();
    observer
        .ready_changes()
        .wait_for(|ready| *ready)
        .await
        .context("Manager stopped before the adapter became ready")?;

    let mut selection = observer.selection_changes();
    let reconnected = remembered
        && tokio::time::timeout(RECONNECT_GRACE, selection.wait_for(Option::is_some))
            .await
            .is_ok();

    if !reconnected {
        info!("Scanning for peripherals...");
        handle.start_scan()?;
        let mut candidates = observer.candidate_changes();
        let first = candidates
            .wait_for(|found| !found.is_empty())
            .await
            .context("Manager stopped while scanning")?
            .first()
            .map(|candidate| candidate.peripheral_id());
        if let Some(id) = first {
            handle.select(id)?;
        }
    }

    let session = selection
        .wait_for(Option::is_some)
        .await
        .context("Manager stopped before a peripheral was selected")?
        .clone();
    match session {
        Some(session) => print_values(session).await,
        None => warn!("Selection was cleared"),
    }
    Ok(())
}

/// Prints every characteristic value as it arrives
async fn print_values(session: SessionHandle<StandardCharacteristic>) {
    let title = session.peripheral().title(DEFAULT_PLACEHOLDER_NAME);
    let streams = StandardCharacteristic::all().iter().map(|&characteristic| {
        session
            .subscribe(characteristic)
            .into_stream()
            .map(move |value| (characteristic, value))
    });
    let mut values = futures_util::stream::select_all(streams);

    while let Some((characteristic, value)) = values.next().await {
        match value {
            Some(value) => println!("{} | {}: {}", title, characteristic, value),
            None => println!("{} | {}: -", title, characteristic),
        }
    }
}
