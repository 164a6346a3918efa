//! Two-layer per-root apply lock
//!
//! Layer 1: a `.namegnome.lock` file under the root held with an
//! exclusive flock (released by the OS if the process dies). Layer 2: a
//! row in the cache store's `locks` table carrying owner metadata for
//! the `423 Locked` response. Both must be held to apply; orphaned rows
//! are recovered when their holder stops renewing.

use fs2::FileExt;
use namegnome_common::db::locks;
use namegnome_common::{Error, Result};
use sqlx::SqlitePool;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".namegnome.lock";

/// Seconds after which a lock row with a dead holder is stolen.
pub const LOCK_STALE_SECS: i64 = 3600;

/// Held root lock; release it explicitly when the apply finishes.
#[derive(Debug)]
pub struct RootLock {
    root_key: String,
    owner: String,
    lock_file: File,
    lock_path: PathBuf,
}

impl RootLock {
    /// Acquire both layers or fail with [`Error::Locked`].
    pub async fn acquire(pool: &SqlitePool, root: &Path, owner: &str) -> Result<Self> {
        let root_key = root.to_string_lossy().into_owned();

        locks::acquire_lock(pool, &root_key, owner, LOCK_STALE_SECS).await?;

        let lock_path = root.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                Error::Filesystem(format!("cannot open lock file {}: {}", lock_path.display(), e))
            })?;

        if let Err(e) = lock_file.try_lock_exclusive() {
            // Another live process holds the flock; back out the row we
            // just wrote so its metadata stays truthful.
            let _ = locks::release_lock(pool, &root_key, owner).await;
            let holder = locks::is_lock_held(pool, &root_key)
                .await
                .ok()
                .flatten();
            return Err(Error::Locked {
                active_job_id: holder
                    .map(|h| h.owner)
                    .unwrap_or_else(|| format!("external process ({})", e)),
                acquired_at: namegnome_common::db::now_epoch(),
            });
        }

        tracing::debug!("Acquired root lock for {}", root_key);
        Ok(Self {
            root_key,
            owner: owner.to_string(),
            lock_file,
            lock_path,
        })
    }

    /// Release both layers.
    pub async fn release(self, pool: &SqlitePool) -> Result<()> {
        FileExt::unlock(&self.lock_file)
            .map_err(|e| Error::Filesystem(format!("unlock failed: {}", e)))?;
        let _ = std::fs::remove_file(&self.lock_path);
        locks::release_lock(pool, &self.root_key, &self.owner).await?;
        tracing::debug!("Released root lock for {}", self.root_key);
        Ok(())
    }
}
