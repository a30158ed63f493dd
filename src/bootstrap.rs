//! First-run document creation.

use crate::error::Result;
use crate::model::{AdminConfig, Document, Meta, Role, Task, User};
use crate::store::{CreateOutcome, DocumentStore};
use chrono::{Days, Local};
use tracing::info;

/// Password the bootstrap admin account starts with.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A minimal well-formed document: one admin user and one week-long sample
/// task starting today. `meta` is left blank for the store to stamp.
#[must_use]
pub fn default_document() -> Document {
    let today = Local::now().date_naive();
    let end = today.checked_add_days(Days::new(7)).unwrap_or(today);

    Document {
        config: AdminConfig::with_password(DEFAULT_ADMIN_PASSWORD),
        meta: Meta::default(),
        tasks: vec![Task {
            id: "t-001".into(),
            name: "Sample project".into(),
            start: today.format(DATE_FORMAT).to_string(),
            end: end.format(DATE_FORMAT).to_string(),
            assignee_id: Some("u1".into()),
            ..Task::default()
        }
        .into()],
        users: vec![User {
            id: "u1".into(),
            name: "Administrator".into(),
            role: Role::Admin,
        }],
        ..Document::default()
    }
}

/// Make sure a document exists and return it.
///
/// The first call writes [`default_document`] unconditionally; any later
/// call, from this process or another, returns what is already on disk with
/// its version unchanged.
pub fn ensure_exists(store: &DocumentStore) -> Result<Document> {
    if let Some(doc) = store.load()? {
        return Ok(doc);
    }
    match store.create_if_absent(default_document())? {
        CreateOutcome::Created(doc) => {
            info!(
                path = %store.path().display(),
                version = doc.meta.version.as_str(),
                "bootstrapped new document"
            );
            Ok(doc)
        }
        CreateOutcome::Existing(doc) => Ok(doc),
    }
}
