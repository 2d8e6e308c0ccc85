// src/services/reply_table.rs
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read reply table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reply table is not a flat string-to-string JSON object: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Canned replies keyed by the exact (already trimmed) message text.
/// Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ReplyTable {
    entries: HashMap<String, String>,
}

impl ReplyTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a JSON object mapping message text to reply text.
    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        let entries: HashMap<String, String> = serde_json::from_str(text)?;

        for key in entries.keys().filter(|k| k.trim() != k.as_str()) {
            tracing::warn!(
                key = %key,
                "reply table key has surrounding whitespace and can never match"
            );
        }

        Ok(Self { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Exact string equality only: no case folding, no partial matches.
    pub fn lookup(&self, message: &str) -> Option<&str> {
        self.entries.get(message).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
