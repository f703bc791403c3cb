//! Recovery integration tests
//!
//! Persist on one instance, recover on a freshly constructed one:
//! - Mode, cached updates and snapshot survive a restart
//! - Tampered records are refused and leave fresh state untouched
//! - Files land atomically with owner-only permissions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use island_node::state::recovery::load_record;
use island_node::state::{SharedChain, SnapshotChain};
use island_node::{
    IslandError, Metadata, Mode, ModeController, OverflowPolicy, RecoveryCoordinator,
    RecoveryOutcome, SyncAck, SyncCollaborator, SyncError, Update, UpdateCache,
};
use tempfile::TempDir;

struct AckAll;

#[async_trait]
impl SyncCollaborator for AckAll {
    async fn sync(&self, _updates: &[Update]) -> Result<SyncAck, SyncError> {
        Ok(SyncAck::all())
    }
}

struct Instance {
    chain: SharedChain,
    controller: Arc<ModeController>,
    recovery: RecoveryCoordinator,
}

fn instance(path: &Path, capacity: usize) -> Instance {
    let chain = SnapshotChain::shared(10).unwrap();
    let controller = ModeController::new(
        UpdateCache::new(capacity, OverflowPolicy::RejectNew).unwrap(),
        Arc::new(AckAll),
    );
    let recovery = RecoveryCoordinator::new(chain.clone(), controller.clone(), path);
    Instance {
        chain,
        controller,
        recovery,
    }
}

/// Holds each batch for a while, then fails it
struct SlowFail;

#[async_trait]
impl SyncCollaborator for SlowFail {
    async fn sync(&self, _updates: &[Update]) -> Result<SyncAck, SyncError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(SyncError::Timeout)
    }
}

fn record_path(dir: &TempDir) -> PathBuf {
    dir.path().join("recovery").join("state.json")
}

/// Island mode, two cached updates, one snapshot, persisted
async fn persisted_island(path: &Path) {
    let node = instance(path, 5);
    node.controller.force_disconnect().await;
    node.controller.cache_update(Update::new(1, vec![1], "trainer-0")).await.unwrap();
    node.controller.cache_update(Update::new(2, vec![2], "trainer-0")).await.unwrap();
    node.chain
        .write()
        .await
        .create_snapshot(2, "sha256:model-v2", 2, Metadata::new())
        .unwrap();

    node.recovery.persist().await.unwrap();
}

fn edit_record(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
    let mut record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    edit(&mut record);
    std::fs::write(path, serde_json::to_vec_pretty(&record).unwrap()).unwrap();
}

async fn assert_fresh(node: &Instance) {
    assert_eq!(node.controller.mode().await, Mode::Online);
    assert_eq!(node.controller.cached_count().await, 0);
    assert!(node.chain.read().await.is_empty());
}

// =============================================================================
// Round trip
// =============================================================================

#[tokio::test]
async fn test_restart_resumes_island_mode() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;

    let restarted = instance(&path, 5);
    let outcome = restarted.recovery.recover().await.unwrap();

    assert_eq!(
        outcome,
        RecoveryOutcome::Restored {
            mode: Mode::Island,
            updates: 2,
            dropped: 0,
            snapshot_round: Some(2),
        }
    );
    assert_eq!(restarted.controller.mode().await, Mode::Island);
    assert_eq!(restarted.controller.cached_count().await, 2);

    let chain = restarted.chain.read().await;
    assert_eq!(chain.len(), 1);
    assert!(chain.verify().is_valid());
}

#[tokio::test]
async fn test_recovered_updates_keep_order() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;

    let restarted = instance(&path, 5);
    restarted.recovery.recover().await.unwrap();

    let rounds: Vec<u64> = restarted
        .controller
        .cached_updates()
        .await
        .iter()
        .map(|u| u.round)
        .collect();
    assert_eq!(rounds, vec![1, 2]);
}

#[tokio::test]
async fn test_recover_into_smaller_cache_reports_dropped() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;

    let restarted = instance(&path, 1);
    match restarted.recovery.recover().await.unwrap() {
        RecoveryOutcome::Restored { updates, dropped, .. } => {
            assert_eq!((updates, dropped), (2, 1));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(restarted.controller.cached_count().await, 1);
}

#[tokio::test]
async fn test_recovered_online_mode_flushes_cache() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;
    edit_record(&path, |record| record["mode"] = serde_json::json!("online"));

    let restarted = instance(&path, 5);
    restarted.recovery.recover().await.unwrap();

    let mut flushed = false;
    for _ in 0..100 {
        if restarted.controller.cached_count().await == 0 {
            flushed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(flushed);
    assert_eq!(restarted.controller.mode().await, Mode::Online);
}

#[tokio::test]
async fn test_recover_on_same_instance_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    let node = instance(&path, 5);
    node.chain
        .write()
        .await
        .create_snapshot(1, "sha256:a", 0, Metadata::new())
        .unwrap();
    node.recovery.persist().await.unwrap();

    node.recovery.recover().await.unwrap();
    assert_eq!(node.chain.read().await.len(), 1);
}

#[tokio::test]
async fn test_persist_during_sync_keeps_unacknowledged_updates() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    let chain = SnapshotChain::shared(10).unwrap();
    let controller = ModeController::new(
        UpdateCache::new(2, OverflowPolicy::RejectNew).unwrap(),
        Arc::new(SlowFail),
    );
    let recovery = RecoveryCoordinator::new(chain, controller.clone(), &path);

    controller.force_disconnect().await;
    controller.cache_update(Update::new(1, vec![1], "trainer-0")).await.unwrap();
    controller.cache_update(Update::new(2, vec![2], "trainer-0")).await.unwrap();
    controller.force_reconnect().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.cached_count().await, 0);

    recovery.persist().await.unwrap();

    let record = load_record(&path).await.unwrap().unwrap();
    let rounds: Vec<u64> = record.updates.iter().map(|u| u.round).collect();
    assert_eq!(rounds, vec![1, 2]);
    assert_eq!(record.mode, Mode::Online);
}

// =============================================================================
// Tampering
// =============================================================================

#[tokio::test]
async fn test_corrupted_hash_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;
    edit_record(&path, |record| {
        record["snapshot"]["hash"] = serde_json::json!("0".repeat(64));
    });

    let restarted = instance(&path, 5);
    let err = restarted.recovery.recover().await.unwrap_err();

    assert!(matches!(err, IslandError::Integrity { .. }));
    assert_fresh(&restarted).await;
}

#[tokio::test]
async fn test_edited_snapshot_field_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;
    edit_record(&path, |record| record["snapshot"]["round"] = serde_json::json!(99));

    let restarted = instance(&path, 5);
    assert!(restarted.recovery.recover().await.unwrap_err().is_integrity());
    assert_fresh(&restarted).await;
}

// =============================================================================
// Files on disk
// =============================================================================

#[tokio::test]
async fn test_persist_leaves_no_staging_file() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;
    persisted_island(&path).await;

    let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_record_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;

    let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
    assert_eq!(file_mode, 0o600);
    assert_eq!(dir_mode, 0o700);
}

#[tokio::test]
async fn test_clear_then_recover_is_cold_start() {
    let dir = TempDir::new().unwrap();
    let path = record_path(&dir);
    persisted_island(&path).await;

    let node = instance(&path, 5);
    assert!(node.recovery.status().await.available);
    node.recovery.clear_recovery_data().await.unwrap();

    assert!(!node.recovery.status().await.available);
    assert_eq!(node.recovery.recover().await.unwrap(), RecoveryOutcome::ColdStart);
    assert_fresh(&node).await;
}
