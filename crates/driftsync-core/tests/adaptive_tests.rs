mod common;

use std::fs;
use std::sync::Arc;

use eyre::Result;
use tempfile::tempdir;

use common::{list_files, write_tree, PooledFs};
use driftsync_core::{Engine, ResizablePool, SyncFilesystem};

fn pooled_pair(temp: &tempfile::TempDir) -> (Arc<PooledFs>, Arc<PooledFs>) {
    (
        Arc::new(PooledFs::new(temp.path().join("src"))),
        Arc::new(PooledFs::new(temp.path().join("dst"))),
    )
}

#[test]
fn adaptive_run_starts_at_one_worker_and_completes() -> Result<()> {
    let temp = tempdir()?;
    let files: Vec<(String, String)> = (0..24)
        .map(|i| (format!("dir{}/f{i:02}.dat", i % 4), format!("data-{i}")))
        .collect();
    let file_refs: Vec<(&str, &str)> = files
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    write_tree(&temp.path().join("src"), &file_refs);

    let (src, dst) = pooled_pair(&temp);
    let mut engine = Engine::with_filesystems(
        Arc::clone(&src) as Arc<dyn SyncFilesystem>,
        Arc::clone(&dst) as Arc<dyn SyncFilesystem>,
    );
    engine.adaptive = true;
    engine.workers = 0;

    engine.analyze()?;
    engine.sync()?;

    let status = engine.get_status();
    assert_eq!(status.processed_files, 24);
    assert_eq!(status.failed_files, 0);
    assert_eq!(list_files(&temp.path().join("dst")).len(), 24);
    // Adaptive with no explicit count starts at a single worker.
    assert!(status.max_workers >= 1);
    assert_eq!(status.target_workers, 1);
    Ok(())
}

#[test]
fn pool_targets_follow_the_initial_worker_count() -> Result<()> {
    let temp = tempdir()?;
    write_tree(
        &temp.path().join("src"),
        &[("a.dat", "a"), ("b.dat", "b"), ("c.dat", "c"), ("d.dat", "d")],
    );

    let (src, dst) = pooled_pair(&temp);
    let mut engine = Engine::with_filesystems(
        Arc::clone(&src) as Arc<dyn SyncFilesystem>,
        Arc::clone(&dst) as Arc<dyn SyncFilesystem>,
    );
    engine.adaptive = true;
    engine.workers = 3;

    engine.analyze()?;
    engine.sync()?;

    // Both sides were retargeted to the logical worker count before any
    // copying began.
    assert_eq!(src.resize_calls().first(), Some(&3));
    assert_eq!(dst.resize_calls().first(), Some(&3));
    assert_eq!(src.pool_target(), 3);
    assert_eq!(dst.pool_target(), 3);
    Ok(())
}

#[test]
fn fixed_mode_clamps_workers_to_the_plan_size() -> Result<()> {
    let temp = tempdir()?;
    write_tree(&temp.path().join("src"), &[("only.dat", "x")]);

    let (src, dst) = pooled_pair(&temp);
    let mut engine = Engine::with_filesystems(
        Arc::clone(&src) as Arc<dyn SyncFilesystem>,
        Arc::clone(&dst) as Arc<dyn SyncFilesystem>,
    );
    engine.workers = 8;

    engine.analyze()?;
    engine.sync()?;

    let status = engine.get_status();
    assert_eq!(status.processed_files, 1);
    // One job means one worker, regardless of the requested count.
    assert_eq!(status.max_workers, 1);
    assert_eq!(src.resize_calls(), vec![1]);
    Ok(())
}

#[test]
fn fixed_mode_runs_a_wide_pool_to_completion() -> Result<()> {
    let temp = tempdir()?;
    let files: Vec<(String, String)> = (0..40)
        .map(|i| (format!("f{i:02}.dat"), "x".repeat(64 + i)))
        .collect();
    let file_refs: Vec<(&str, &str)> = files
        .iter()
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    write_tree(&temp.path().join("src"), &file_refs);
    fs::create_dir_all(temp.path().join("dst"))?;

    let mut engine = Engine::new(
        temp.path().join("src").to_str().unwrap(),
        temp.path().join("dst").to_str().unwrap(),
    )?;
    engine.workers = 4;

    engine.analyze()?;
    engine.sync()?;

    let status = engine.get_status();
    assert_eq!(status.processed_files, 40);
    assert_eq!(status.max_workers, 4);
    assert_eq!(status.active_workers, 0, "workers drain at completion");
    assert_eq!(list_files(&temp.path().join("dst")).len(), 40);
    assert_eq!(
        status.processed_files + status.failed_files + status.cancelled_files,
        status.total_files
    );
    Ok(())
}
