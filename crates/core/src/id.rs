//! Identifiers for form progress records.

use serde::{Deserialize, Serialize};

/// Opaque identifier of a user, issued by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tag distinguishing independent wizards, e.g. `structuring` or `enterprise`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormType(String);

impl FormType {
    /// Wrap a form tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Borrow the raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FormType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FormType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Composite key of a progress record: one record per user and form type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressKey {
    /// Owning user
    pub user_id: UserId,
    /// Wizard the record belongs to
    pub form_type: FormType,
}

impl ProgressKey {
    /// Build a key.
    pub fn new(user_id: UserId, form_type: FormType) -> Self {
        Self { user_id, form_type }
    }
}

impl std::fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.form_type)
    }
}
