//! Application commands and the manager's event loop
//! Commands and radio events are consumed by one task, so every state
//! mutation happens on a single serialized context.

use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::catalog::{CharacteristicCatalog, ServiceCatalog};
use crate::core::bluetooth::manager::{DiscoveryManager, ManagerObserver};
use crate::core::bluetooth::types::{PeripheralId, RadioEvent};

/// Requests from the application layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerCommand {
    PowerOn,
    StartScan,
    StopScan,
    Select(PeripheralId),
    ClearSelection,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Discovery manager has shut down")]
pub struct ManagerClosed;

impl<S: ServiceCatalog> DiscoveryManager<S> {
    pub async fn handle_command(&mut self, command: ManagerCommand) {
        debug!("Handling command: {:?}", command);
        match command {
            ManagerCommand::PowerOn => self.power_on(),
            ManagerCommand::StartScan => self.start_scan(),
            ManagerCommand::StopScan => self.stop_scan(),
            ManagerCommand::Select(id) => self.select(id).await,
            ManagerCommand::ClearSelection => self.clear_selection().await,
            ManagerCommand::Reconnect => {
                self.reconnect().await;
            }
        }
    }

    /// Consumes radio events and commands until cancelled or both channels close
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        cancel: CancellationToken,
    ) {
        info!("Discovery manager event loop started.");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(command) = commands.recv() => self.handle_command(command).await,
                else => break,
            }
        }
        info!("Discovery manager event loop stopped.");
    }

    /// Moves the manager onto its own task
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> (ManagerHandle<S::Characteristic>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = ManagerHandle {
            commands: tx,
            observer: self.observer(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(self.run(events, rx, cancel));
        (handle, task)
    }
}

/// Clonable application handle onto a running manager
#[derive(Clone)]
pub struct ManagerHandle<C: CharacteristicCatalog> {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    observer: ManagerObserver<C>,
    cancel: CancellationToken,
}

impl<C: CharacteristicCatalog> ManagerHandle<C> {
    pub fn send(&self, command: ManagerCommand) -> Result<(), ManagerClosed> {
        self.commands.send(command).map_err(|_| ManagerClosed)
    }

    pub fn power_on(&self) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::PowerOn)
    }

    pub fn start_scan(&self) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::StartScan)
    }

    pub fn stop_scan(&self) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::StopScan)
    }

    /// Selects a peripheral and connects to it
    pub fn select(&self, id: PeripheralId) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::Select(id))
    }

    pub fn clear_selection(&self) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::ClearSelection)
    }

    pub fn reconnect(&self) -> Result<(), ManagerClosed> {
        self.send(ManagerCommand::Reconnect)
    }

    pub fn observer(&self) -> &ManagerObserver<C> {
        &self.observer
    }

    /// Stops the event loop; the session and its caches are dropped with it
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
