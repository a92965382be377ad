//! Commit orchestrator - applies a reconciliation plan to an archived tree.
//!
//! The report starts with the container listing done when the destination
//! was opened. Phases always run in the same order:
//! - add: create every new directory up front, then compress in parallel
//! - update: compress through a staging file that replaces the old container
//! - move: relocate containers one at a time
//! - delete: remove top-level deleted directories one at a time
//!
//! Failures are isolated per directory and collected in the report.

pub mod batch;
pub mod marker;

use crate::archive::{self, ArchivedDirId, CipherStrength, CONTAINER_NAME};
use crate::diff::{BackupDiff, DiffSummary};
use crate::engine::Engine;
use crate::tree::DirId;
use crate::utils::{EngineError, Result};
use batch::{run_parallel, run_sequential, BatchOutcome};
use marker::write_marker;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Result of one commit
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub summary: DiffSummary,
    pub phases: Vec<BatchOutcome>,
    pub duration_secs: u64,
}

impl CommitReport {
    pub fn error_count(&self) -> usize {
        self.phases.iter().map(BatchOutcome::error_count).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.phases.iter().all(BatchOutcome::is_clean)
    }

    pub fn phase(&self, action: &str) -> Option<&BatchOutcome> {
        self.phases.iter().find(|phase| phase.action == action)
    }
}

fn after_phase(engine: &Engine, phases: &mut Vec<BatchOutcome>, outcome: BatchOutcome) -> Result<()> {
    phases.push(outcome);
    if engine.is_cancelled() {
        warn!(completed_phases = phases.len(), "Commit cancelled");
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Apply `diff` to its destination archive
pub fn commit(
    engine: &Engine,
    diff: &BackupDiff<'_>,
    password: &str,
    strength: CipherStrength,
) -> Result<CommitReport> {
    let start_time = Instant::now();
    let source = diff.source();
    let destination = diff.destination();
    let backup_root = destination.located_in().clone();
    let summary = diff.summary();

    info!(source = %source.root(), destination = %destination.root(), %summary, "Starting commit");

    write_marker(&backup_root, &source.top_node().name, &source.root())?;

    let mut phases = Vec::with_capacity(6);
    phases.push(destination.listing_outcome().clone());

    // Add
    let added: Vec<DirId> = diff.dirs_to_add.iter().copied().collect();
    let created = run_sequential(
        engine,
        "Creating directories",
        &added,
        |&dir| source.relative_path(dir).to_string(),
        |&dir| {
            let target = source.destination_in(&backup_root, dir);
            std::fs::create_dir_all(target.as_path()).map_err(|e| EngineError::fs(target.as_path(), e))
        },
    );
    after_phase(engine, &mut phases, created)?;

    let outcome = run_parallel(
        engine,
        "Adding",
        &added,
        |&dir| source.relative_path(dir).to_string(),
        |&dir| {
            let entries = source.pending_entries(dir);
            if entries.is_empty() {
                return Ok(());
            }
            let target = source.destination_in(&backup_root, dir);
            archive::write_container(engine.codec(), &entries, target.as_path(), password, strength)
        },
    );
    after_phase(engine, &mut phases, outcome)?;

    // Update
    let updated: Vec<(ArchivedDirId, DirId)> =
        diff.dirs_to_update.iter().map(|(&a, &d)| (a, d)).collect();
    let outcome = run_parallel(
        engine,
        "Updating",
        &updated,
        |&(archived, _)| destination.relative_path(archived).to_string(),
        |&(archived, dir)| {
            let target = destination.absolute_path(archived);
            let entries = source.pending_entries(dir);
            if !entries.is_empty() {
                return archive::write_container(
                    engine.codec(),
                    &entries,
                    target.as_path(),
                    password,
                    strength,
                );
            }
            let container = target.join_file(CONTAINER_NAME);
            match std::fs::remove_file(&container) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    Err(EngineError::fs(container, e))
                }
                _ => Ok(()),
            }
        },
    );
    after_phase(engine, &mut phases, outcome)?;

    // Move
    let moved: Vec<(DirId, ArchivedDirId)> =
        diff.dirs_to_move.iter().map(|(&d, &a)| (d, a)).collect();
    let outcome = run_sequential(
        engine,
        "Moving",
        &moved,
        |&(dir, _)| source.relative_path(dir).to_string(),
        |&(dir, archived)| {
            let target = source.destination_in(&backup_root, dir);
            std::fs::create_dir_all(target.as_path())
                .map_err(|e| EngineError::fs(target.as_path(), e))?;
            if let Some(container) = destination.container_path(archived) {
                let moved_to = target.join_file(CONTAINER_NAME);
                std::fs::rename(&container, &moved_to).map_err(|e| EngineError::fs(&container, e))?;
            }
            Ok(())
        },
    );
    after_phase(engine, &mut phases, outcome)?;

    // Delete
    let deleted: Vec<ArchivedDirId> = diff.top_dirs_to_delete.iter().copied().collect();
    let outcome = run_sequential(
        engine,
        "Deleting",
        &deleted,
        |&id| destination.relative_path(id).to_string(),
        |&id| {
            let path = destination.absolute_path(id);
            std::fs::remove_dir_all(path.as_path()).map_err(|e| EngineError::fs(path.as_path(), e))
        },
    );
    after_phase(engine, &mut phases, outcome)?;

    let report = CommitReport {
        summary,
        phases,
        duration_secs: start_time.elapsed().as_secs(),
    };
    info!(
        errors = report.error_count(),
        duration_secs = report.duration_secs,
        "Commit finished"
    );
    Ok(report)
}
