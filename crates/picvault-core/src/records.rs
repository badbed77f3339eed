use std::fmt;

use serde::{Deserialize, Serialize};

/// One image URL owned by a user, with its like flag and tags (plaintext).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub url: String,
    #[serde(default)]
    pub liked: bool,
    /// Insertion order, duplicates allowed.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record {
    /// Fresh record as created by an add: not liked, no tags.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            liked: false,
            tags: Vec::new(),
        }
    }
}

/// A single encrypted text value in `ivHex:ciphertext` form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EncryptedField(String);

impl EncryptedField {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored shape of a [`Record`]: `url` and every tag encrypted, `liked` in clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub url: EncryptedField,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub tags: Vec<EncryptedField>,
}

/// Per-candidate result of an add request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlOutcome {
    pub url: String,
    pub success: bool,
}

impl UrlOutcome {
    pub fn new(url: impl Into<String>, success: bool) -> Self {
        Self {
            url: url.into(),
            success,
        }
    }
}

/// Wholesale tag replacement for one URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagUpdate {
    pub url: String,
    pub tags: Vec<String>,
}

impl TagUpdate {
    pub fn new(url: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            url: url.into(),
            tags,
        }
    }
}
