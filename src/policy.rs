//! How callers react to conflicts and contention.
//!
//! The two failure modes of a write look alike but are handled differently:
//!
//! * [`Error::Locked`](crate::Error::Locked) is transient. Another local process is mid-write, and
//!   trying again shortly is safe. [`RetryPolicy`] does exactly that.
//! * [`Error::Conflict`](crate::Error::Conflict) means the caller's change was based on a stale read.
//!   Retrying the same write can never succeed, and overwriting would lose
//!   someone else's edit. The change has to be reloaded and redone, which is
//!   a decision for the operator. Nothing here retries or merges it.

use crate::error::Result;
use crate::model::Document;
use crate::store::DocumentStore;
use std::time::Duration;
use tracing::debug;

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Stale read: reload, re-apply the intent, resubmit.
    ReloadAndRedo,
    /// Lock contention: wait a moment and try the same thing again.
    WaitAndRetry,
    /// No document yet: bootstrap one first.
    Bootstrap,
    /// Nothing the caller can do automatically.
    Fatal,
}

impl Recovery {
    /// Short guidance suitable for showing to a person.
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            Recovery::ReloadAndRedo => {
                "someone else changed the data; reload, re-apply your edit and save again"
            }
            Recovery::WaitAndRetry => "the data file is busy; try again in a moment",
            Recovery::Bootstrap => "no data file exists yet",
            Recovery::Fatal => "the data file could not be read or written",
        }
    }
}

/// Bounded retry for lock contention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Run `op`, repeating it while it fails with lock contention and
    /// attempts remain. Every other outcome, a version conflict included, is
    /// returned as soon as it happens.
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "document busy, retrying");
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Client-side optimistic lock chaining.
///
/// Remembers the version of the last document it loaded or wrote and sends
/// it as the expected version on the next commit. After a conflict the
/// remembered version stays put, so every further commit keeps failing until
/// [`load`](Self::load) is called again. A stale edit can't sneak through on
/// a second try.
///
/// A session that has never loaded commits unconditionally.
pub struct Session<'a> {
    store: &'a DocumentStore,
    version: Option<String>,
    retry: RetryPolicy,
}

impl<'a> Session<'a> {
    /// Session on `store` with no version captured yet.
    pub fn new(store: &'a DocumentStore) -> Self {
        Self {
            store,
            version: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry commits that hit lock contention.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Version the next commit will be checked against.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Read the current document and adopt its version.
    pub fn load(&mut self) -> Result<Option<Document>> {
        let doc = self.store.load()?;
        self.version = doc.as_ref().and_then(|d| d.version().map(str::to_owned));
        Ok(doc)
    }

    /// Write `document` against the captured version. On success the new
    /// version is captured and returned.
    pub fn commit(&mut self, document: Document) -> Result<String> {
        let expected = self.version.clone();
        let version = self
            .retry
            .run(|| self.store.write(document.clone(), expected.as_deref()))?;
        self.version = Some(version.clone());
        Ok(version)
    }

    /// Apply `f` to the current document against the captured version.
    pub fn modify<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let (version, out) = self.store.modify(self.version.as_deref(), f)?;
        self.version = Some(version);
        Ok(out)
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.store.path())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

