//! Operations exposed to the HTTP layer.
//!
//! Each method maps to one endpoint. Request parsing and response rendering
//! stay with the caller; [`Error::code`](crate::Error::code) and
//! [`Recovery::hint`](crate::Recovery::hint) give it what it needs to tell a
//! conflict apart from a busy file.

use crate::bootstrap::ensure_exists;
use crate::config::{InstanceConfig, Mode};
use crate::error::{Error, Result};
use crate::model::{Document, Role, User};
use crate::store::DocumentStore;
use serde::Serialize;
use tracing::info;

/// Attribution recorded for a document replaced without a writer name.
pub const UNKNOWN_WRITER: &str = "unknown";

/// Runtime facts about this server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    /// Admin or user server.
    pub mode: Mode,
    /// User this instance acts for, if any.
    pub user_id: Option<String>,
    /// Unix seconds, for clients to gauge clock skew.
    pub server_time: i64,
    /// Where the shared document lives.
    pub data_path: String,
}

/// The document store plus this instance's identity.
#[derive(Debug)]
pub struct DocumentService {
    store: DocumentStore,
    mode: Mode,
    user_id: Option<String>,
}

impl DocumentService {
    /// Service over the document described by `config`.
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            store: DocumentStore::new(config.store),
            mode: config.mode,
            user_id: config.user_id,
        }
    }

    /// Service configured from `WBS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(InstanceConfig::from_env()?))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// `GET document`: the current document, creating the default one on
    /// first access.
    pub fn get_document(&self) -> Result<Document> {
        ensure_exists(&self.store)
    }

    /// `PUT document`: replace the whole document.
    ///
    /// `meta.updated_by` is set to `updated_by`, or to [`UNKNOWN_WRITER`]
    /// without one; whatever the submitted document carried is discarded.
    /// Returns the new version, or [`Error::Conflict`] / [`Error::Locked`].
    pub fn put_document(
        &self,
        mut document: Document,
        expected_version: Option<&str>,
        updated_by: Option<&str>,
    ) -> Result<String> {
        let by = updated_by.map(str::trim).filter(|by| !by.is_empty());
        document.meta.updated_by = Some(by.unwrap_or(UNKNOWN_WRITER).to_owned());
        self.store.write(document, expected_version)
    }

    /// `POST appendUser`: add a member named `name`.
    ///
    /// The id is `u<n>` for the lowest `n` above the current user count that
    /// isn't taken. The read and the append happen under one lock, so two
    /// concurrent appends can't pick the same id or drop each other.
    pub fn append_user(&self, name: &str, expected_version: Option<&str>) -> Result<(User, String)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("user name is empty".into()));
        }

        let (version, user) = self.store.modify(expected_version, |doc| {
            let user = User {
                id: next_user_id(&doc.users),
                name: name.to_owned(),
                role: Role::Member,
            };
            doc.users.push(user.clone());
            Ok(user)
        })?;
        info!(id = user.id.as_str(), %version, "user added");
        Ok((user, version))
    }

    /// Check `password` against the stored admin hash.
    pub fn authenticate(&self, password: &str) -> Result<bool> {
        let doc = self.store.load()?.ok_or(Error::NotFound)?;
        Ok(doc.config.verify_admin_password(password))
    }

    /// Mode, acting user, clock and data path of this instance.
    #[must_use]
    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            mode: self.mode,
            user_id: self.user_id.clone(),
            server_time: chrono::Utc::now().timestamp(),
            data_path: self.store.path().display().to_string(),
        }
    }
}

fn next_user_id(users: &[User]) -> String {
    let mut n = users.len() + 1;
    loop {
        let id = format!("u{n}");
        if users.iter().all(|u| u.id != id) {
            return id;
        }
        n += 1;
    }
}
