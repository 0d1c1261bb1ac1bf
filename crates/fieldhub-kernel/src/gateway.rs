//! [`Gateway`] – the single coordinating task.
//!
//! The gateway owns the [`DeviceRegistry`] and the in-memory
//! [`ConfigDocument`].  Everything that reads or mutates them goes through a
//! [`GatewayHandle`], which turns each call into a [`Command`] on an mpsc
//! channel.  Commands run one at a time, so two reports for the same unknown
//! address can never both allocate a unit.
//!
//! | Input | Effect |
//! |---|---|
//! | report, unknown address, discovery on | allocate a unit, record descriptor, merge changes |
//! | report, unknown address, discovery off | ignored |
//! | report, disabled device | refresh `lastSeenAt` only |
//! | report, enabled device | merge changes, refresh `lastSeenAt` |
//! | report without channels | refresh `lastSeenAt`, no event |
//! | change request from a client | merge changes, always emit `device:change` |

use std::sync::Arc;

use fieldhub_hal::{DeviceRegistry, Discovered, Report, ReportSource, allocate};
use fieldhub_types::{
    Address, ChangeRequest, ConfigDocument, Device, DeviceLookup, RegistryError,
    RegistryObserver, RegistrySnapshot,
};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::id::IdGenerator;
use crate::persistence::PersistenceHandle;

/// Depth of the command queue before callers start waiting.
pub const COMMAND_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("gateway coordinator is not running")]
    Stopped,
}

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Report(Report),
    ApplyChange {
        request: ChangeRequest,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Get {
        lookup: DeviceLookup,
        reply: oneshot::Sender<Option<Device>>,
    },
    List(oneshot::Sender<Vec<Device>>),
    Snapshot(oneshot::Sender<RegistrySnapshot>),
    Remove {
        address: Address,
        reply: oneshot::Sender<Result<Device, GatewayError>>,
    },
    Shutdown(oneshot::Sender<()>),
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway
// ────────────────────────────────────────────────────────────────────────────

pub struct Gateway {
    registry: DeviceRegistry,
    config: ConfigDocument,
    persistence: PersistenceHandle,
    ids: IdGenerator,
}

impl Gateway {
    /// Build the gateway and register every device listed in `config`.
    ///
    /// Disabled devices are registered too, so their unit and address stay
    /// reserved, but their reports are ignored.  A descriptor that collides
    /// with an earlier one is logged and skipped.
    pub fn new(config: ConfigDocument, persistence: PersistenceHandle) -> Self {
        let mut gateway = Self {
            registry: DeviceRegistry::new(),
            config,
            persistence,
            ids: IdGenerator::new(),
        };
        gateway.load_devices();
        gateway
    }

    fn load_devices(&mut self) {
        for descriptor in &self.config.devices {
            let id = descriptor
                .id
                .clone()
                .unwrap_or_else(|| self.ids.next_id("device"));

            if !descriptor.enabled {
                info!(%id, address = %descriptor.address, "device not enabled");
            }
            let device = Device::new(descriptor.address.clone(), descriptor.unit)
                .with_enabled(descriptor.enabled);
            match self.registry.add(device) {
                Ok(()) => info!(
                    %id,
                    address = %descriptor.address,
                    unit = %descriptor.unit,
                    "mapping device"
                ),
                Err(e) => error!(%id, error = %e, "failed to map configured device"),
            }
        }
    }

    /// Attach an observer that will see every subsequent registry event.
    pub fn observe(&mut self, observer: Arc<dyn RegistryObserver>) {
        self.registry.observe(observer);
    }

    /// Move the gateway onto its own task.
    pub fn spawn(self) -> (GatewayHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(receiver));
        (GatewayHandle { commands }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(devices = self.registry.len(), "gateway started");
        while let Some(command) = commands.recv().await {
            trace!(?command, "gateway command");
            match command {
                Command::Report(report) => self.handle_report(report),
                Command::ApplyChange { request, reply } => {
                    let _ = reply.send(self.apply_change(request));
                }
                Command::Get { lookup, reply } => {
                    let _ = reply.send(self.registry.get(&lookup).cloned());
                }
                Command::List(reply) => {
                    let _ = reply.send(self.registry.list());
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.registry.snapshot());
                }
                Command::Remove { address, reply } => {
                    let _ = reply.send(self.remove(&address));
                }
                Command::Shutdown(ack) => {
                    let _ = ack.send(());
                    break;
                }
            }
        }
        info!("gateway stopped");
    }

    fn handle_report(&mut self, report: Report) {
        let lookup = DeviceLookup::Address(report.address.clone());
        match self.registry.get(&lookup).map(|device| device.enabled) {
            Some(true) => self.merge_report(report),
            Some(false) => {
                trace!(address = %report.address, "report from disabled device; state not merged");
                if let Err(e) = self.registry.touch(&report.address) {
                    warn!(error = %e, "failed to refresh disabled device");
                }
            }
            None if self.config.discovery_enabled() => self.discover(report),
            None => trace!(address = %report.address, "report from unknown device ignored"),
        }
    }

    fn discover(&mut self, report: Report) {
        let Discovered { descriptor, .. } = match allocate(&mut self.registry, &report.address) {
            Ok(discovered) => discovered,
            Err(e) => {
                warn!(error = %e, "discovery dropped report");
                return;
            }
        };

        self.config.record_device(descriptor);
        if self.config.remember_discovered() {
            self.persistence.request(self.config.clone());
        }

        self.merge_report(report);
    }

    /// A report without channels is a presence beacon: it refreshes
    /// `lastSeenAt` and emits nothing.
    fn merge_report(&mut self, report: Report) {
        let result = if report.changes.is_empty() {
            self.registry.touch(&report.address)
        } else {
            self.registry.apply_change(&report.address, report.changes)
        };
        if let Err(e) = result {
            warn!(address = %report.address, error = %e, "failed to apply report");
        }
    }

    fn apply_change(&mut self, request: ChangeRequest) -> Result<(), GatewayError> {
        let address = self
            .registry
            .get(&request.device)
            .map(|device| device.address.clone())
            .ok_or_else(|| RegistryError::NotFound(request.device.clone()))?;
        self.registry.apply_change(&address, request.changes)?;
        Ok(())
    }

    /// Unregister a device and drop its descriptor from the config.
    fn remove(&mut self, address: &Address) -> Result<Device, GatewayError> {
        let device = self.registry.remove(address)?;
        let before = self.config.devices.len();
        self.config.devices.retain(|d| &d.address != address);
        if self.config.devices.len() != before {
            self.persistence.request(self.config.clone());
        }
        info!(address = %address, unit = %device.unit, "device removed");
        Ok(device)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable front door to a running [`Gateway`].
#[derive(Clone, Debug)]
pub struct GatewayHandle {
    commands: mpsc::Sender<Command>,
}

impl GatewayHandle {
    /// Queue a decoded report.
    pub async fn report(&self, report: Report) -> Result<(), GatewayError> {
        self.commands
            .send(Command::Report(report))
            .await
            .map_err(|_| GatewayError::Stopped)
    }

    /// Merge a client's changes into the named device.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no device matches.
    pub async fn apply_change(&self, request: ChangeRequest) -> Result<(), GatewayError> {
        self.call(|reply| Command::ApplyChange { request, reply })
            .await?
    }

    pub async fn get(&self, lookup: DeviceLookup) -> Result<Option<Device>, GatewayError> {
        self.call(|reply| Command::Get { lookup, reply }).await
    }

    /// All devices, sorted by unit.
    pub async fn list(&self) -> Result<Vec<Device>, GatewayError> {
        self.call(Command::List).await
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, GatewayError> {
        self.call(Command::Snapshot).await
    }

    pub async fn remove(&self, address: Address) -> Result<Device, GatewayError> {
        self.call(|reply| Command::Remove { address, reply }).await?
    }

    /// Stop the coordinator after the commands already queued.
    pub async fn shutdown(&self) {
        let _ = self.call(Command::Shutdown).await;
    }

    /// Feed every report of `source` into the gateway on a new task.  The
    /// task ends with the source's stream or when the gateway stops.
    pub fn attach(&self, source: Arc<dyn ReportSource>) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let name = source.name().to_string();
            info!(source = %name, "report source attached");
            let mut reports = source.reports().await;
            while let Some(report) = reports.next().await {
                if gateway.report(report).await.is_err() {
                    break;
                }
            }
            info!(source = %name, "report source detached");
        })
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, GatewayError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| GatewayError::Stopped)?;
        response.await.map_err(|_| GatewayError::Stopped)
    }
}
