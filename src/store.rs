//! The versioned document store.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::lock::{LockCoordinator, LockGuard};
use crate::model::Document;
use crate::persist::{atomic_write, load};
use crate::serializer::{JsonSerializer, Serializer};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Single-file JSON document shared between cooperating local processes.
///
/// Reads are lock-free. Every write runs "reload, compare version, stamp,
/// replace" inside the [`LockCoordinator`]'s critical section, so two writers
/// that started from the same version can never both succeed.
///
/// ```rust,no_run
/// use wbs_store::{Document, DocumentStore, StoreConfig};
///
/// let store = DocumentStore::new(StoreConfig::new("data/wbs.json"));
/// let v1 = store.write(Document::default(), None).unwrap();
/// let mut doc = store.load().unwrap().unwrap();
/// doc.meta.updated_by = Some("alice".into());
/// let v2 = store.write(doc, Some(v1.as_str())).unwrap();
/// assert_ne!(v1, v2);
/// ```
pub struct DocumentStore {
    config: StoreConfig,
    coordinator: LockCoordinator,
    serializer: JsonSerializer,
}

/// What [`DocumentStore::create_if_absent`] found.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// No document existed; this one was written.
    Created(Document),
    /// A document was already there and was left alone.
    Existing(Document),
}

impl CreateOutcome {
    /// The document now on disk.
    #[must_use]
    pub fn into_document(self) -> Document {
        match self {
            CreateOutcome::Created(doc) | CreateOutcome::Existing(doc) => doc,
        }
    }

    /// `true` if this call wrote the document.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

impl DocumentStore {
    /// Store over the document described by `config`. Nothing is touched on
    /// disk until the first load or write.
    pub fn new(config: StoreConfig) -> Self {
        let serializer = if config.pretty {
            JsonSerializer::pretty()
        } else {
            JsonSerializer::new()
        };
        Self {
            coordinator: LockCoordinator::from_config(&config),
            config,
            serializer,
        }
    }

    /// Store at `path` with default lock timings.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(StoreConfig::new(path))
    }

    // ---- reads ----

    /// Read the document as it is on disk right now. `Ok(None)` if it doesn't
    /// exist yet. Takes no lock.
    pub fn load(&self) -> Result<Option<Document>> {
        load(&self.config.path, &self.serializer)
    }

    /// Current stored version, `None` if there is no document.
    pub fn version(&self) -> Result<Option<String>> {
        Ok(self.load()?.and_then(|doc| doc.version().map(str::to_owned)))
    }

    /// Path to the backing JSON file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Settings this store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The coordinator guarding this document.
    #[must_use]
    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    // ---- writes ----

    /// Replace the document with `document`.
    ///
    /// With `expected_version` set, the write only lands if it equals the
    /// version currently on disk; otherwise it fails with
    /// [`Error::Conflict`] and nothing is written. `None` (or an empty string)
    /// is an unconditional, last-writer-wins write.
    ///
    /// Returns the freshly generated version token, which the caller should
    /// pass as `expected_version` next time.
    pub fn write(&self, mut document: Document, expected_version: Option<&str>) -> Result<String> {
        let guard = self.lock()?;
        let current = self.load()?;
        check_version(current.as_ref(), expected_version)?;
        let version = self.persist(&guard, current.as_ref(), &mut document)?;
        drop(guard);
        Ok(version)
    }

    /// Read-modify-write in a single critical section.
    ///
    /// `f` sees the document as it is on disk while the lock is held, so no
    /// other writer can slip in between the read and the write. If `f` fails
    /// nothing is written. Fails with [`Error::NotFound`] if there is no
    /// document.
    pub fn modify<F, T>(&self, expected_version: Option<&str>, f: F) -> Result<(String, T)>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let guard = self.lock()?;
        let current = self.load()?.ok_or(Error::NotFound)?;
        check_version(Some(&current), expected_version)?;
        let mut next = current.clone();
        let out = f(&mut next)?;
        let version = self.persist(&guard, Some(&current), &mut next)?;
        drop(guard);
        Ok((version, out))
    }

    /// Write `document` unconditionally, but only if no document exists yet.
    ///
    /// The existence check and the write share one critical section, so of
    /// several processes racing to create the document exactly one wins and
    /// the rest see its result.
    pub fn create_if_absent(&self, mut document: Document) -> Result<CreateOutcome> {
        let guard = self.lock()?;
        if let Some(existing) = self.load()? {
            return Ok(CreateOutcome::Existing(existing));
        }
        self.persist(&guard, None, &mut document)?;
        drop(guard);
        Ok(CreateOutcome::Created(document))
    }

    // ---- internal ----

    fn lock(&self) -> Result<LockGuard<'_>> {
        self.coordinator.acquire(self.config.lock_timeout)
    }

    /// Stamp a fresh version and timestamp, then replace the file. The guard
    /// argument only proves the caller is inside the critical section.
    fn persist(
        &self,
        _guard: &LockGuard<'_>,
        current: Option<&Document>,
        document: &mut Document,
    ) -> Result<String> {
        let previous = current.and_then(Document::version);
        let mut version = Uuid::new_v4().to_string();
        while previous == Some(version.as_str()) {
            version = Uuid::new_v4().to_string();
        }
        document.meta.version = version.clone();
        document.meta.last_updated = chrono::Utc::now().timestamp();

        let bytes = self.serializer.serialize(document)?;
        atomic_write(&self.config.path, &self.config.tmp_path(), &bytes)?;
        info!(
            path = %self.config.path.display(),
            %version,
            previous = previous.unwrap_or(""),
            updated_by = document.meta.updated_by.as_deref().unwrap_or(""),
            "document written"
        );
        Ok(version)
    }
}

/// `Ok` if `expected` is absent or matches the stored version.
fn check_version(current: Option<&Document>, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let actual = current.and_then(Document::version);
    if actual == Some(expected) {
        return Ok(());
    }
    debug!(expected, actual = actual.unwrap_or(""), "version conflict");
    Err(Error::Conflict {
        expected: expected.to_owned(),
        actual: actual.map(str::to_owned),
    })
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.config.path)
            .field("lock_timeout", &self.config.lock_timeout)
            .finish_non_exhaustive()
    }
}
