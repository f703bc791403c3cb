//! Connectivity monitor - polls a reachability probe and reports to the controller

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::controller::ModeController;
use super::probe::ReachabilityProbe;
use crate::error::{IslandError, Result};

enum MonitorCommand {
    /// Report unreachable now, without waiting for the next poll
    ForceOffline,
    Shutdown,
}

/// Periodic reachability poller
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
}

/// Control handle for a running monitor
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(IslandError::Config(
                "connectivity check interval must be greater than 0".to_string(),
            ));
        }
        Ok(Self { probe, interval })
    }

    /// Start polling. The first poll happens immediately.
    pub fn spawn(self, controller: Arc<ModeController>) -> MonitorHandle {
        let (commands, mut command_rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            let mut tick = interval(self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_ms = self.interval.as_millis() as u64, "Connectivity monitor started");

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let reachable = self.probe.is_reachable().await;
                        debug!(reachable, "Connectivity poll");
                        controller.report_reachability(reachable).await;
                    }
                    command = command_rx.recv() => match command {
                        Some(MonitorCommand::ForceOffline) => {
                            warn!("Forced offline signal received");
                            controller.report_reachability(false).await;
                            tick.reset();
                        }
                        Some(MonitorCommand::Shutdown) | None => break,
                    }
                }
            }

            info!("Connectivity monitor stopped");
        });

        MonitorHandle { commands, task }
    }
}

impl MonitorHandle {
    /// Simulated or faulted disconnection, bypassing the next poll
    pub async fn force_offline(&self) {
        let _ = self.commands.send(MonitorCommand::ForceOffline).await;
    }

    /// Stop future polls and wait for the loop to exit.
    ///
    /// Transitions already committed keep their listener and sync tasks.
    pub async fn shutdown(self) {
        let _ = self.commands.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connectivity monitor task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::island::cache::{OverflowPolicy, UpdateCache};
    use crate::island::probe::StaticProbe;
    use crate::island::{Mode, Update};
    use crate::sync::{SyncAck, SyncCollaborator, SyncError};
    use async_trait::async_trait;

    struct AckAll;

    #[async_trait]
    impl SyncCollaborator for AckAll {
        async fn sync(&self, _updates: &[Update]) -> std::result::Result<SyncAck, SyncError> {
            Ok(SyncAck::all())
        }
    }

    fn controller() -> Arc<ModeController> {
        ModeController::new(
            UpdateCache::new(5, OverflowPolicy::RejectNew).unwrap(),
            Arc::new(AckAll),
        )
    }

    async fn wait_for_mode(controller: &ModeController, mode: Mode) -> bool {
        for _ in 0..100 {
            if controller.mode().await == mode {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_monitor_follows_probe() {
        let probe = StaticProbe::new(true);
        let controller = controller();
        let handle = ConnectivityMonitor::new(Arc::new(probe.clone()), Duration::from_millis(20))
            .unwrap()
            .spawn(controller.clone());

        probe.set(false);
        assert!(wait_for_mode(&controller, Mode::Island).await);

        probe.set(true);
        assert!(wait_for_mode(&controller, Mode::Online).await);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_force_offline_bypasses_poll() {
        let probe = StaticProbe::new(true);
        let controller = controller();
        // Long interval: only the immediate first poll runs during the test
        let handle = ConnectivityMonitor::new(Arc::new(probe), Duration::from_secs(3600))
            .unwrap()
            .spawn(controller.clone());

        assert!(wait_for_mode(&controller, Mode::Online).await);
        handle.force_offline().await;
        assert!(wait_for_mode(&controller, Mode::Island).await);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let probe = StaticProbe::new(true);
        let controller = controller();
        let handle = ConnectivityMonitor::new(Arc::new(probe.clone()), Duration::from_millis(10))
            .unwrap()
            .spawn(controller.clone());
        assert!(handle.is_running());

        handle.shutdown().await;
        probe.set(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.mode().await, Mode::Online);
    }

    #[test]
    fn test_zero_interval_is_config_error() {
        let result = ConnectivityMonitor::new(Arc::new(StaticProbe::new(true)), Duration::ZERO);
        assert!(matches!(result, Err(IslandError::Config(_))));
    }
}
