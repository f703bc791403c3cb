//! Wired island node - controller, chain, recovery and monitor under one roof

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{IslandError, Result};
use crate::island::probe::build_probe;
use crate::island::{
    ConnectivityMonitor, ControllerStatus, Metadata, ModeController, MonitorHandle,
    ReachabilityProbe, Update, UpdateCache,
};
use crate::state::{
    ChainVerdict, RecoveryCoordinator, RecoveryOutcome, RecoveryStatus, SharedChain, Snapshot,
    SnapshotChain,
};
use crate::sync::{OutboxSync, SyncCollaborator};

/// Full node status, as served on `/api/status`
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    #[serde(flatten)]
    pub controller: ControllerStatus,
    pub chain_length: usize,
    pub chain_capacity: usize,
    pub time_since_last_snapshot_ms: u64,
    pub monitor_running: bool,
    pub recovery: RecoveryStatus,
}

struct PersistTask {
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

pub struct IslandNode {
    config: Config,
    controller: Arc<ModeController>,
    chain: SharedChain,
    recovery: Arc<RecoveryCoordinator>,
    probe: Arc<dyn ReachabilityProbe>,
    monitor: Mutex<Option<MonitorHandle>>,
    persister: Mutex<Option<PersistTask>>,
}

impl IslandNode {
    /// Build a node from a validated config and injected collaborators
    pub fn new(
        config: Config,
        probe: Arc<dyn ReachabilityProbe>,
        sync: Arc<dyn SyncCollaborator>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = UpdateCache::new(config.island.cache_capacity, config.island.overflow_policy)?;
        let controller = ModeController::new(cache, sync);
        let chain = SnapshotChain::shared(config.island.max_snapshots)?;
        let recovery = Arc::new(RecoveryCoordinator::new(
            chain.clone(),
            controller.clone(),
            config.recovery_path(),
        ));

        Ok(Self {
            config,
            controller,
            chain,
            recovery,
            probe,
            monitor: Mutex::new(None),
            persister: Mutex::new(None),
        })
    }

    /// Build a node with the probe from `[probe]` and an outbox collaborator
    pub fn from_config(config: Config) -> Result<Self> {
        let probe = build_probe(&config.probe)?;
        let sync = Arc::new(OutboxSync::new(config.node.id.clone(), config.outbox_dir()));
        Self::new(config, probe, sync)
    }

    /// Recover persisted state, then start polling and background persistence.
    ///
    /// A record that fails its integrity check is discarded with a warning and
    /// the node starts fresh. Other recovery errors are returned.
    pub async fn start(&self) -> Result<RecoveryOutcome> {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(IslandError::Config("node already started".to_string()));
        }

        let outcome = match self.recovery.recover().await {
            Ok(outcome) => outcome,
            Err(e) if e.is_integrity() => {
                warn!(error = %e, "Discarding untrusted recovery record");
                RecoveryOutcome::ColdStart
            }
            Err(e) => return Err(e),
        };

        if self.config.recovery.persist_on_transition {
            let recovery = self.recovery.clone();
            self.controller
                .add_listener(move |from, to| {
                    let recovery = recovery.clone();
                    tokio::spawn(async move {
                        if let Err(e) = recovery.persist().await {
                            warn!(from = %from, to = %to, error = %e, "Persist after transition failed");
                        }
                    });
                })
                .await;
        }

        let check_interval = Duration::from_millis(self.config.island.check_interval_ms);
        *monitor = Some(
            ConnectivityMonitor::new(self.probe.clone(), check_interval)?
                .spawn(self.controller.clone()),
        );

        if self.config.recovery.persist_interval_secs > 0 {
            *self.persister.lock().await = Some(self.spawn_persister(Duration::from_secs(
                self.config.recovery.persist_interval_secs,
            )));
        }

        info!(node_id = %self.config.node.id, outcome = ?outcome, "Island node started");
        Ok(outcome)
    }

    fn spawn_persister(&self, every: Duration) -> PersistTask {
        let (shutdown, mut shutdown_rx) = mpsc::channel(1);
        let recovery = self.recovery.clone();

        let task = tokio::spawn(async move {
            let mut tick = interval(every);
            // The first tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = recovery.persist().await {
                            warn!(error = %e, "Periodic persist failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Periodic persistence stopped");
        });

        PersistTask { shutdown, task }
    }

    /// Stop the monitor and periodic persistence, then write a final record
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.shutdown().await;
        }

        if let Some(persister) = self.persister.lock().await.take() {
            let _ = persister.shutdown.send(()).await;
            if let Err(e) = persister.task.await {
                warn!(error = %e, "Persistence task ended abnormally");
            }
        }

        self.recovery.persist().await?;
        info!(node_id = %self.config.node.id, "Island node stopped");
        Ok(())
    }

    /// Append a snapshot of local training state to the chain
    pub async fn checkpoint(
        &self,
        round: u64,
        state_checksum: impl Into<String>,
        update_count: u64,
        metadata: Metadata,
    ) -> Result<Snapshot> {
        self.chain
            .write()
            .await
            .create_snapshot(round, state_checksum, update_count, metadata)
    }

    pub async fn cache_update(&self, update: Update) -> Result<()> {
        self.controller.cache_update(update).await
    }

    /// Signal the monitor to report unreachable now. No-op before `start`.
    pub async fn force_offline(&self) {
        if let Some(monitor) = self.monitor.lock().await.as_ref() {
            monitor.force_offline().await;
        }
    }

    pub async fn verify_chain(&self) -> ChainVerdict {
        self.chain.read().await.verify()
    }

    pub async fn status(&self) -> NodeStatus {
        let controller = self.controller.status().await;
        let (chain_length, chain_capacity, since_snapshot) = {
            let chain = self.chain.read().await;
            (chain.len(), chain.capacity(), chain.time_since_last_snapshot())
        };
        let monitor_running = self
            .monitor
            .lock()
            .await
            .as_ref()
            .map(MonitorHandle::is_running)
            .unwrap_or(false);

        NodeStatus {
            node_id: self.config.node.id.clone(),
            controller,
            chain_length,
            chain_capacity,
            time_since_last_snapshot_ms: since_snapshot.as_millis() as u64,
            monitor_running,
            recovery: self.recovery.status().await,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &Arc<ModeController> {
        &self.controller
    }

    pub fn chain(&self) -> &SharedChain {
        &self.chain
    }

    pub fn recovery(&self) -> &Arc<RecoveryCoordinator> {
        &self.recovery
    }
}
