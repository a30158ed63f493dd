//! Cross-process mutual exclusion over the shared document.
//!
//! The lock is a marker file next to the document (`<document>.lock`) created
//! with `O_CREAT | O_EXCL` semantics, so exactly one holder can exist at a
//! time across every process on the host. A marker whose mtime is further from
//! now than the staleness threshold belongs to a holder that died without
//! releasing; it is reclaimed and acquisition carries on within the same
//! timeout window. Reclaim only ever deletes the marker whose token was judged
//! stale.
//!
//! Contended acquisition polls with a fixed backoff until the timeout, then
//! reports [`Error::Locked`]. Threads sharing one [`LockCoordinator`] queue on
//! an in-process mutex first so they don't all poll the filesystem.

use crate::config::{StoreConfig, DEFAULT_STALE_AFTER, MIN_POLL_INTERVAL};
use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Hands out exclusive access to one document path.
#[derive(Debug)]
pub struct LockCoordinator {
    path: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
    local: Mutex<()>,
}

impl LockCoordinator {
    /// Coordinator for the marker at `path`.
    ///
    /// A zero `stale_after` falls back to [`DEFAULT_STALE_AFTER`] and
    /// `poll_interval` is raised to at least [`MIN_POLL_INTERVAL`]; use
    /// [`StoreConfig::validate`] to reject such values up front.
    pub fn new(path: impl AsRef<Path>, stale_after: Duration, poll_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let stale_after = if stale_after.is_zero() {
            warn!(path = %path.display(), "zero lock staleness threshold, using the default");
            DEFAULT_STALE_AFTER
        } else {
            stale_after
        };
        Self {
            path,
            stale_after,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            local: Mutex::new(()),
        }
    }

    /// Coordinator for the document described by `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.lock_path(), config.stale_after, config.poll_interval)
    }

    /// Path of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` if a marker exists and is not yet stale.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        marker_age(&self.path).is_ok_and(|age| age <= self.stale_after)
    }

    /// Block for up to `timeout` trying to take the lock.
    ///
    /// The returned guard releases the lock when dropped, so the critical
    /// section ends on every exit path including `?` and panics.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;

        let Some(local) = self.local.try_lock_until(deadline) else {
            return Err(self.locked(started));
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Io(format!("{}: {e}", parent.display())))?;
        }

        let token = format!("{}:{}", std::process::id(), Uuid::new_v4());
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.create_marker(&token) {
                Ok(()) => {
                    debug!(
                        path = %self.path.display(),
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "document lock acquired"
                    );
                    return Ok(LockGuard {
                        coordinator: self,
                        token,
                        acquired_at: Instant::now(),
                        released: false,
                        _local: local,
                    });
                }
                Err(e) if self.is_contention(&e) => {
                    if self.reclaim_if_stale()? {
                        continue;
                    }
                }
                Err(e) => return Err(self.io_error(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.locked(started));
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn locked(&self, started: Instant) -> Error {
        let waited = started.elapsed();
        debug!(
            path = %self.path.display(),
            waited_ms = waited.as_millis() as u64,
            "document lock timed out"
        );
        Error::Locked {
            path: self.path.clone(),
            waited,
        }
    }

    // A marker that is mid-delete on Windows reports PermissionDenied.
    fn is_contention(&self, err: &std::io::Error) -> bool {
        match err.kind() {
            ErrorKind::AlreadyExists => true,
            ErrorKind::PermissionDenied => self.path.exists(),
            _ => false,
        }
    }

    fn create_marker(&self, token: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        if let Err(e) = file.write_all(token.as_bytes()) {
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the marker if it is past the staleness threshold. `Ok(true)`
    /// means the caller should retry creation right away.
    fn reclaim_if_stale(&self) -> Result<bool> {
        // Token before age, so the age judged belongs to this token or a newer one.
        let seen = match fs::read_to_string(&self.path) {
            Ok(token) => token,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(self.io_error(e)),
        };
        let age = match marker_age(&self.path) {
            Ok(age) => age,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(self.io_error(e)),
        };
        if age <= self.stale_after {
            return Ok(false);
        }
        if marker_dated_ahead(&self.path) {
            warn!(
                path = %self.path.display(),
                ahead_ms = age.as_millis() as u64,
                "lock marker is dated in the future, treating it as stale"
            );
        }

        match self.move_aside()? {
            Some(grave) => Ok(self.settle(&grave, &seen, age)),
            None => Ok(true),
        }
    }

    /// Rename the marker to a unique sibling. `None` if it was already gone.
    fn move_aside(&self) -> Result<Option<PathBuf>> {
        let mut grave = self.path.clone().into_os_string();
        grave.push(format!(".stale-{}", Uuid::new_v4()));
        let grave = PathBuf::from(grave);
        match fs::rename(&self.path, &grave) {
            Ok(()) => Ok(Some(grave)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Dispose of a marker moved aside by [`move_aside`](Self::move_aside).
    ///
    /// Only the marker carrying `seen`, the token judged stale, is deleted,
    /// and then `true` is returned. Any other marker belongs to a live holder
    /// and is put back. If that fails because a newer marker already took the
    /// path, the moved one is kept on disk and the overlap is logged.
    fn settle(&self, grave: &Path, seen: &str, age: Duration) -> bool {
        let moved = fs::read_to_string(grave).ok();
        if moved.as_deref() == Some(seen) {
            if let Err(e) = fs::remove_file(grave) {
                debug!(grave = %grave.display(), error = %e, "could not delete reclaimed marker");
            }
            warn!(
                path = %self.path.display(),
                age_ms = age.as_millis() as u64,
                "reclaimed stale document lock"
            );
            return true;
        }

        match self.restore(grave, moved.as_deref()) {
            Ok(()) => {
                let _ = fs::remove_file(grave);
                warn!(
                    path = %self.path.display(),
                    "live lock marker moved during reclaim, restored it"
                );
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    grave = %grave.display(),
                    error = %e,
                    "could not restore a live lock marker; its holder may overlap with the current one"
                );
            }
        }
        false
    }

    /// Put a moved marker back without replacing one created since.
    fn restore(&self, grave: &Path, token: Option<&str>) -> std::io::Result<()> {
        match fs::hard_link(grave, &self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
            // No hard links here; recreate it from its token instead.
            Err(e) => match token {
                Some(token) => self.create_marker(token),
                None => Err(e),
            },
        }
    }

    fn io_error(&self, err: std::io::Error) -> Error {
        Error::Io(format!("{}: {err}", self.path.display()))
    }

    fn remove_marker(&self, token: &str) -> Result<()> {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == token => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            },
            Ok(_) => {
                warn!(
                    path = %self.path.display(),
                    "lock was reclaimed by another holder, leaving its marker"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "lock marker vanished before release");
                Ok(())
            }
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Distance between the marker's mtime and now. A marker dated in the future
/// (the clock was stepped back) ages by how far ahead it is.
fn marker_age(path: &Path) -> std::io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(match SystemTime::now().duration_since(modified) {
        Ok(age) => age,
        Err(ahead) => ahead.duration(),
    })
}

fn marker_dated_ahead(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .is_ok_and(|modified| modified > SystemTime::now())
}

/// Proof of holding the document lock. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
    token: String,
    acquired_at: Instant,
    released: bool,
    _local: MutexGuard<'a, ()>,
}

impl LockGuard<'_> {
    /// Release now and report any problem removing the marker. Dropping the
    /// guard does the same but can only log failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.finish()
    }

    /// Time since the lock was taken.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    fn finish(&self) -> Result<()> {
        let result = self.coordinator.remove_marker(&self.token);
        debug!(
            path = %self.coordinator.path.display(),
            held_ms = self.held_for().as_millis() as u64,
            "document lock released"
        );
        result
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(error = %e, "failed to release document lock");
        }
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.coordinator.path)
            .field("held_for", &self.held_for())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(dir: &tempfile::TempDir) -> LockCoordinator {
        LockCoordinator::new(
            dir.path().join("doc.json.lock"),
            Duration::from_secs(30),
            Duration::from_millis(10),
        )
    }

    fn graves(dir: &tempfile::TempDir) -> Vec<PathBuf> {
        fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".stale-"))
            .collect()
    }

    #[test]
    fn settle_deletes_the_marker_judged_stale() {
        let dir = tempfile::tempdir().unwrap();
        let lock = coordinator(&dir);
        fs::write(lock.path(), "1:dead").unwrap();

        let grave = lock.move_aside().unwrap().unwrap();
        assert!(lock.settle(&grave, "1:dead", Duration::from_secs(60)));
        assert!(!lock.path().exists());
        assert!(graves(&dir).is_empty());
    }

    #[test]
    fn settle_puts_back_a_marker_swapped_in_after_the_age_check() {
        let dir = tempfile::tempdir().unwrap();
        let lock = coordinator(&dir);
        // The stale "1:dead" was replaced by a live holder before the rename.
        fs::write(lock.path(), "2:live").unwrap();

        let grave = lock.move_aside().unwrap().unwrap();
        assert!(!lock.settle(&grave, "1:dead", Duration::from_secs(60)));
        assert_eq!(fs::read_to_string(lock.path()).unwrap(), "2:live");
        assert!(graves(&dir).is_empty());
    }

    #[test]
    fn settle_never_replaces_a_marker_created_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let lock = coordinator(&dir);
        fs::write(lock.path(), "2:live").unwrap();

        let grave = lock.move_aside().unwrap().unwrap();
        // A third process takes the free path before the restore.
        fs::write(lock.path(), "3:newcomer").unwrap();

        assert!(!lock.settle(&grave, "1:dead", Duration::from_secs(60)));
        assert_eq!(fs::read_to_string(lock.path()).unwrap(), "3:newcomer");
        assert_eq!(fs::read_to_string(&grave).unwrap(), "2:live");
    }

    #[test]
    fn move_aside_of_missing_marker_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(coordinator(&dir).move_aside().unwrap(), None);
    }

    #[test]
    fn future_dated_marker_counts_as_old() {
        let dir = tempfile::tempdir().unwrap();
        let lock = coordinator(&dir);
        fs::write(lock.path(), "1:from-the-future").unwrap();
        let file = fs::File::options().write(true).open(lock.path()).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();
        drop(file);

        assert!(marker_age(lock.path()).unwrap() > Duration::from_secs(3500));
        assert!(marker_dated_ahead(lock.path()));
        assert!(!lock.is_locked());
        assert!(lock.reclaim_if_stale().unwrap());
        assert!(!lock.path().exists());
    }
}
