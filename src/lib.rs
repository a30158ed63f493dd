//! Shared single-file JSON document store with optimistic versioning.
//!
//! A handful of local processes (one admin server, several user servers)
//! read and rewrite the same JSON file. Two mechanisms keep them from
//! clobbering each other:
//!
//! * a lock marker next to the document serializes every
//!   "reload, compare, write" cycle, reclaiming markers left by crashed
//!   holders, and
//! * a version token stamped on every write turns a write based on a stale
//!   read into an [`Error::Conflict`] instead of a lost update.
//!
//! ```rust,no_run
//! use wbs_store::{bootstrap, DocumentStore, Error, StoreConfig};
//!
//! let store = DocumentStore::new(StoreConfig::new("data/wbs_data.json"));
//! let mut doc = bootstrap::ensure_exists(&store).unwrap();
//! let base = doc.meta.version.clone();
//!
//! doc.tasks.clear();
//! match store.write(doc, Some(base.as_str())) {
//!     Ok(version) => println!("saved as {version}"),
//!     Err(e @ Error::Conflict { .. }) => println!("reload first: {e}"),
//!     Err(e) => println!("{}", e.recovery().hint()),
//! }
//! ```
//!
//! **Single host only.** The lock is a plain file; it does not coordinate
//! across machines sharing a network drive.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod persist;
pub mod policy;
pub mod serializer;
pub mod service;
pub mod store;

pub use config::{InstanceConfig, Mode, StoreConfig};
pub use error::{Error, Result};
pub use lock::{LockCoordinator, LockGuard};
pub use model::{AdminConfig, Document, Meta, Role, Task, User};
pub use policy::{Recovery, RetryPolicy, Session};
pub use service::{DocumentService, SystemInfo};
pub use store::{CreateOutcome, DocumentStore};
