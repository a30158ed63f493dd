//! The persisted document and its parts.
//!
//! Only `meta` matters to the concurrency machinery. Tasks are stored as raw
//! JSON values and written back exactly as they were read; [`Task`] is a typed
//! view for callers that want one. Missing or `null` fields elsewhere fall
//! back to their defaults instead of failing the whole load.

use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The whole shared document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Credentials and other settings.
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: AdminConfig,
    /// Concurrency-control metadata.
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: Meta,
    /// Work breakdown items, uninterpreted.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Value>,
    /// Known users, in insertion order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<User>,
    /// Top-level fields this crate doesn't model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Stored version token, or `None` if the document was never written.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        if self.meta.version.is_empty() {
            None
        } else {
            Some(&self.meta.version)
        }
    }

    /// Look up a user by id.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Look up a task by its `id` field.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Value> {
        self.tasks
            .iter()
            .find(|t| t.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Append `task` in its JSON form.
    pub fn push_task(&mut self, task: Task) {
        self.tasks.push(task.into());
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Version metadata, rewritten by the store on every successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Opaque revision token. Empty until the first write.
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    /// Unix seconds of the last successful write.
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_updated: i64,
    /// Free-text attribution of the last writer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Document-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Lowercase hex SHA-256 of the admin password.
    #[serde(default, deserialize_with = "null_as_default")]
    pub admin_password_hash: String,
}

impl AdminConfig {
    /// Config whose admin password is `password`.
    #[must_use]
    pub fn with_password(password: &str) -> Self {
        Self {
            admin_password_hash: hash_password(password),
        }
    }

    /// `true` if `password` hashes to the stored digest.
    #[must_use]
    pub fn verify_admin_password(&self, password: &str) -> bool {
        !self.admin_password_hash.is_empty()
            && self.admin_password_hash.eq_ignore_ascii_case(&hash_password(password))
    }
}

/// Hex-encoded SHA-256 of `password`.
#[must_use]
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// What a user may do.
///
/// Roles this crate doesn't know are kept verbatim in [`Role::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Full access, including user management.
    Admin,
    /// Regular participant.
    #[default]
    Member,
    /// Any other role string found on disk.
    Other(String),
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "admin" => Role::Admin,
            "member" => Role::Member,
            _ => Role::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => "admin".into(),
            Role::Member => "member".into(),
            Role::Other(s) => s,
        }
    }
}

/// A person tasks can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique within the document.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Permission level.
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: Role,
}

/// Typed view of one work breakdown row.
///
/// The store never converts stored tasks through this type. Use
/// [`Task::from_value`] to read one and [`Document::push_task`] to add one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the document.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub start: String,
    /// `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub end: String,
    /// Id of the assigned user.
    #[serde(default)]
    pub assignee_id: Option<String>,
    /// Id of the parent task for nested items.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Completion percentage, 0 to 100.
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: f64,
    /// Zero-length marker rather than a span.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_milestone: bool,
    /// Ids of tasks this one waits on.
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<String>,
    /// Fields this crate doesn't model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Read a stored task. Fails with [`Error::Corrupt`](crate::Error::Corrupt)
    /// if `value` isn't an object of the expected shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Task::deserialize(value)?)
    }
}

impl From<Task> for Value {
    fn from(task: Task) -> Self {
        let mut map = task.extra;
        map.insert("id".into(), task.id.into());
        map.insert("name".into(), task.name.into());
        map.insert("start".into(), task.start.into());
        map.insert("end".into(), task.end.into());
        map.insert("assignee_id".into(), task.assignee_id.into());
        map.insert("parent_id".into(), task.parent_id.into());
        map.insert("progress".into(), progress_number(task.progress));
        map.insert("is_milestone".into(), task.is_milestone.into());
        map.insert("dependencies".into(), task.dependencies.into());
        Value::Object(map)
    }
}

// Whole percentages are written as integers, the way clients send them.
fn progress_number(progress: f64) -> Value {
    if progress.fract() == 0.0 && (0.0..=u64::MAX as f64).contains(&progress) {
        Value::from(progress as u64)
    } else {
        Value::from(progress)
    }
}
