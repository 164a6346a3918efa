//! Apply executor: locked, snapshot-verified, atomic renames
//!
//! Pre-flight re-checks the plan's recorded source state and skips
//! drifted items as stale. The root is held under a two-layer exclusive
//! lock for the whole run. Renames execute in `items[]` order, recording
//! a rollback manifest entry per committed rename; transactional mode
//! reverses the committed prefix on the first hard failure,
//! continue-on-error mode returns a rollback token instead.

pub mod lockfile;
pub mod manifest;

use crate::apply::lockfile::RootLock;
use crate::apply::manifest::{
    read_manifest, ManifestEntry, ManifestHeader, RollbackWriter, MANIFEST_SCHEMA_VERSION,
};
use namegnome_common::events::{EventBus, NgEvent};
use namegnome_common::types::{
    ApplyMode, ApplyOutcome, ApplyResult, ApplyStatus, CollisionStrategy, PlanItem, PlanReview,
};
use namegnome_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const STATUS_APPLIED: &str = "applied";
pub const STATUS_ROLLED_BACK: &str = "rolled_back";
pub const STATUS_ROLLBACK_SKIPPED: &str = "rollback_skipped";

/// Apply controls.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    pub mode: ApplyMode,
    pub collision: CollisionStrategy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            mode: ApplyMode::default(),
            collision: CollisionStrategy::default(),
        }
    }
}

#[cfg(unix)]
fn inode_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.ino())
}

#[cfg(not(unix))]
fn inode_of(_path: &Path) -> Option<u64> {
    None
}

fn mtime_of(path: &Path) -> Option<i64> {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Apply a reviewed plan against a root.
pub async fn apply_plan(
    pool: &SqlitePool,
    review: &PlanReview,
    root: &Path,
    options: ApplyOptions,
    events: Option<(&EventBus, Uuid)>,
) -> Result<ApplyResult> {
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "apply root is not a directory: {}",
            root.display()
        )));
    }

    let report_id = Uuid::new_v4().to_string();
    let lock = RootLock::acquire(pool, root, &report_id).await?;
    let result = run_apply(review, root, &report_id, options, events).await;
    lock.release(pool).await?;
    result
}

async fn run_apply(
    review: &PlanReview,
    root: &Path,
    report_id: &str,
    options: ApplyOptions,
    events: Option<(&EventBus, Uuid)>,
) -> Result<ApplyResult> {
    // Pre-flight: recorded source state vs the filesystem right now
    let mut stale_sources: HashMap<PathBuf, String> = HashMap::new();
    for group in &review.groups {
        let path = &group.src_file.path;
        match std::fs::metadata(path) {
            Ok(meta) => {
                let current_mtime = mtime_of(path).unwrap_or(0);
                if current_mtime != group.src_file.mtime || meta.len() != group.src_file.size {
                    stale_sources.insert(path.clone(), "source changed since scan".into());
                }
            }
            Err(_) => {
                stale_sources.insert(path.clone(), "source missing since scan".into());
            }
        }
    }

    let dry_run = options.mode == ApplyMode::DryRun;
    let mut writer = if dry_run {
        None
    } else {
        Some(RollbackWriter::create(
            root,
            &ManifestHeader {
                record_type: "header".into(),
                schema_version: MANIFEST_SCHEMA_VERSION.into(),
                report_id: report_id.to_string(),
                plan_id: review.plan_id.clone(),
                root: root.to_path_buf(),
                mode: options.mode,
                collision_strategy: options.collision,
                generated_at: now_iso(),
            },
        )?)
    };

    let mut outcomes: Vec<ApplyOutcome> = Vec::with_capacity(review.items.len());
    let mut committed: Vec<ManifestEntry> = Vec::new();
    let mut hard_failure = false;
    let total = review.items.len() as u64;

    for (index, item) in review.items.iter().enumerate() {
        let outcome = if let Some(reason) = stale_sources.get(&item.src.path) {
            ApplyOutcome {
                item_id: item.id.clone(),
                src: item.src.path.clone(),
                dst: item.dst.path.clone(),
                status: ApplyStatus::SkippedStale,
                reason: Some(reason.clone()),
                backup_path: None,
            }
        } else {
            execute_item(item, root, options, dry_run, writer.as_mut(), &mut committed)?
        };

        if let Some((bus, job_id)) = events {
            bus.emit(NgEvent::Progress {
                job_id,
                phase: "apply".into(),
                completed: (index + 1) as u64,
                total,
            });
            if outcome.status == ApplyStatus::Failed {
                bus.emit(NgEvent::Warning {
                    job_id,
                    code: "apply_failed".into(),
                    detail: outcome.reason.clone().unwrap_or_default(),
                });
            }
        }

        let failed = outcome.status == ApplyStatus::Failed;
        outcomes.push(outcome);

        if failed && options.mode == ApplyMode::Transactional && !dry_run {
            hard_failure = true;
            break;
        }
    }

    if hard_failure {
        rollback_committed(&committed, &mut outcomes);
    }

    let applied_count = outcomes
        .iter()
        .filter(|o| o.status == ApplyStatus::Applied)
        .count();
    let skipped_count = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o.status,
                ApplyStatus::SkippedCollision | ApplyStatus::SkippedStale | ApplyStatus::Noop
            )
        })
        .count();
    let failed_count = outcomes
        .iter()
        .filter(|o| matches!(o.status, ApplyStatus::Failed | ApplyStatus::RolledBack))
        .count();

    let rollback_token = if options.mode == ApplyMode::ContinueOnError
        && !dry_run
        && applied_count > 0
    {
        Some(report_id.to_string())
    } else {
        None
    };

    tracing::info!(
        "Apply {}: {} applied, {} skipped, {} failed ({:?})",
        report_id,
        applied_count,
        skipped_count,
        failed_count,
        options.mode
    );

    Ok(ApplyResult {
        report_id: report_id.to_string(),
        plan_id: review.plan_id.clone(),
        mode: options.mode,
        total_items: review.items.len(),
        applied_count,
        skipped_count,
        failed_count,
        outcomes,
        rollback_token,
    })
}

fn execute_item(
    item: &PlanItem,
    root: &Path,
    options: ApplyOptions,
    dry_run: bool,
    writer: Option<&mut RollbackWriter>,
    committed: &mut Vec<ManifestEntry>,
) -> Result<ApplyOutcome> {
    let src = &item.src.path;
    let dst = resolve_dst(root, &item.dst.path);

    let mut outcome = ApplyOutcome {
        item_id: item.id.clone(),
        src: src.clone(),
        dst: dst.clone(),
        status: ApplyStatus::Noop,
        reason: None,
        backup_path: None,
    };

    if *src == dst {
        outcome.reason = Some("source already at destination".into());
        return Ok(outcome);
    }

    if !src.exists() {
        outcome.status = ApplyStatus::Failed;
        outcome.reason = Some("source file does not exist".into());
        return Ok(outcome);
    }

    let collision = dst.exists() && !is_case_variant(src, &dst);
    if collision {
        match options.collision {
            CollisionStrategy::Skip => {
                outcome.status = ApplyStatus::SkippedCollision;
                outcome.reason = Some("destination exists".into());
                return Ok(outcome);
            }
            CollisionStrategy::Backup => {
                let backup = backup_path_for(&dst);
                if !dry_run {
                    if let Err(e) = std::fs::rename(&dst, &backup) {
                        outcome.status = ApplyStatus::Failed;
                        outcome.reason = Some(format!("failed to back up existing file: {}", e));
                        return Ok(outcome);
                    }
                }
                outcome.backup_path = Some(backup);
            }
            CollisionStrategy::Overwrite => {
                if !dry_run {
                    if let Err(e) = std::fs::remove_file(&dst) {
                        outcome.status = ApplyStatus::Failed;
                        outcome.reason = Some(format!("failed to remove existing file: {}", e));
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    if dry_run {
        outcome.status = ApplyStatus::Applied;
        outcome.reason = Some("dry_run".into());
        return Ok(outcome);
    }

    if let Some(parent) = dst.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            outcome.status = ApplyStatus::Failed;
            outcome.reason = Some(format!("failed to create destination directory: {}", e));
            return Ok(outcome);
        }
    }

    let rename_result = if is_case_variant(src, &dst) {
        // Two-step rename so case-only changes land on case-insensitive
        // filesystems too
        let temp = dst.with_extension("ngtmp");
        std::fs::rename(src, &temp).and_then(|_| std::fs::rename(&temp, &dst))
    } else {
        std::fs::rename(src, &dst)
    };

    if let Err(e) = rename_result {
        outcome.status = ApplyStatus::Failed;
        outcome.reason = Some(if e.raw_os_error() == Some(18) {
            "cross-device move is not supported".to_string()
        } else {
            format!("rename failed: {}", e)
        });
        return Ok(outcome);
    }

    outcome.status = ApplyStatus::Applied;

    let entry = ManifestEntry {
        ts: now_iso(),
        op: "rename".into(),
        src_before: src.clone(),
        dst_after: dst.clone(),
        status: STATUS_APPLIED.into(),
        inode: inode_of(&dst),
        mtime: mtime_of(&dst),
        backup_path: outcome.backup_path.clone(),
        reason: None,
    };
    if let Some(writer) = writer {
        writer.append(&entry)?;
    }
    committed.push(entry);

    Ok(outcome)
}

/// Plans carry relative destinations under the root; absolute paths pass
/// through untouched.
fn resolve_dst(root: &Path, dst: &Path) -> PathBuf {
    if dst.is_absolute() {
        dst.to_path_buf()
    } else {
        root.join(dst)
    }
}

fn is_case_variant(a: &Path, b: &Path) -> bool {
    a != b && a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// `name.ext` -> `name.bak.ext`, with a numeric suffix when taken.
fn backup_path_for(dst: &Path) -> PathBuf {
    let stem = dst
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = dst
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = dst.parent().unwrap_or(Path::new(""));

    let mut candidate = parent.join(format!("{}.bak{}", stem, ext));
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}.bak.{}{}", stem, counter, ext));
        counter += 1;
    }
    candidate
}

/// Reverse the committed prefix in reverse order; outcomes flip to
/// rolled_back.
fn rollback_committed(committed: &[ManifestEntry], outcomes: &mut [ApplyOutcome]) {
    for entry in committed.iter().rev() {
        let restored = undo_entry(entry);
        if let Some(outcome) = outcomes
            .iter_mut()
            .find(|o| o.src == entry.src_before && o.status == ApplyStatus::Applied)
        {
            outcome.status = if restored {
                ApplyStatus::RolledBack
            } else {
                ApplyStatus::Failed
            };
            if !restored {
                outcome.reason = Some(STATUS_ROLLBACK_SKIPPED.into());
            }
        }
    }
}

/// Undo one committed rename, verifying the recorded inode still sits at
/// the destination. Returns false when the undo was skipped.
fn undo_entry(entry: &ManifestEntry) -> bool {
    if let (Some(recorded), Some(current)) = (entry.inode, inode_of(&entry.dst_after)) {
        if recorded != current {
            tracing::warn!(
                "Rollback skipped, inode changed at {}",
                entry.dst_after.display()
            );
            return false;
        }
    } else if !entry.dst_after.exists() {
        tracing::warn!(
            "Rollback skipped, destination missing: {}",
            entry.dst_after.display()
        );
        return false;
    }

    if let Some(parent) = entry.src_before.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::rename(&entry.dst_after, &entry.src_before) {
        tracing::warn!("Rollback rename failed: {}", e);
        return false;
    }

    // Restore a displaced file if this rename backed one up
    if let Some(backup) = &entry.backup_path {
        if backup.exists() {
            let _ = std::fs::rename(backup, &entry.dst_after);
        }
    }
    true
}

/// Undo a previous apply from its persisted manifest (continue-on-error's
/// `rollback_token`). Takes the same root lock as an apply.
pub async fn rollback_report(
    pool: &SqlitePool,
    root: &Path,
    report_id: &str,
) -> Result<ApplyResult> {
    let owner = format!("rollback:{}", report_id);
    let lock = RootLock::acquire(pool, root, &owner).await?;
    let result = run_rollback(root, report_id).await;
    lock.release(pool).await?;
    result
}

async fn run_rollback(root: &Path, report_id: &str) -> Result<ApplyResult> {
    let (header, entries) = read_manifest(root, report_id)?;

    let mut outcomes = Vec::new();
    let mut applied_count = 0;
    let mut failed_count = 0;

    for entry in entries.iter().rev() {
        if entry.status != STATUS_APPLIED {
            continue;
        }
        let restored = undo_entry(entry);
        if restored {
            applied_count += 1;
        } else {
            failed_count += 1;
        }
        outcomes.push(ApplyOutcome {
            item_id: String::new(),
            src: entry.dst_after.clone(),
            dst: entry.src_before.clone(),
            status: if restored {
                ApplyStatus::RolledBack
            } else {
                ApplyStatus::Failed
            },
            reason: (!restored).then(|| STATUS_ROLLBACK_SKIPPED.to_string()),
            backup_path: entry.backup_path.clone(),
        });
    }

    Ok(ApplyResult {
        report_id: report_id.to_string(),
        plan_id: header.plan_id,
        mode: header.mode,
        total_items: outcomes.len(),
        applied_count,
        skipped_count: 0,
        failed_count,
        outcomes,
        rollback_token: None,
    })
}
