//! Static identity table keyed by classifier label.
//!
//! Built once at startup from the embedded roster or a TOML file, then
//! shared read-only. The table is never mutated after construction.

use crate::types::Identity;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity file not found: {0}")]
    NotFound(String),
    #[error("failed to read identity file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid identity file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate label in identity table: {0}")]
    DuplicateLabel(String),
    #[error("identity entry {index}: {field} must not be empty")]
    EmptyField { index: usize, field: &'static str },
}

/// One `[[identity]]` entry in the TOML roster.
#[derive(Debug, Deserialize)]
struct IdentityEntry {
    label: String,
    id: String,
    name: String,
    #[serde(default)]
    position: String,
}

#[derive(Debug, Deserialize)]
struct IdentityFile {
    #[serde(default)]
    identity: Vec<IdentityEntry>,
}

/// Read-only mapping from classifier label to [`Identity`].
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    by_label: HashMap<String, Identity>,
}

impl IdentityTable {
    /// The embedded roster of the reference deployment.
    pub fn builtin() -> Self {
        let entries = [
            ("Dhavin", "KT001", "Dhavin Fasya Alviyanto", "IPTEK"),
            ("Nono", "KT002", "Nono", "Staff Administrasi"),
            ("Joko", "KT003", "Joko Anwar", "Security"),
        ];
        let by_label = entries
            .into_iter()
            .map(|(label, id, name, position)| {
                (
                    label.to_string(),
                    Identity {
                        id: id.to_string(),
                        name: name.to_string(),
                        position: position.to_string(),
                    },
                )
            })
            .collect();
        Self { by_label }
    }

    /// Build a table from `(label, identity)` pairs, rejecting duplicate labels.
    pub fn from_entries<I>(entries: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = (String, Identity)>,
    {
        let mut by_label = HashMap::new();
        for (label, identity) in entries {
            if by_label.contains_key(&label) {
                return Err(IdentityError::DuplicateLabel(label));
            }
            by_label.insert(label, identity);
        }
        Ok(Self { by_label })
    }

    /// Parse a TOML roster.
    ///
    /// ```toml
    /// [[identity]]
    /// label = "Dhavin"
    /// id = "KT001"
    /// name = "Dhavin Fasya Alviyanto"
    /// position = "IPTEK"
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, IdentityError> {
        let file: IdentityFile = toml::from_str(src)?;
        let mut entries = Vec::with_capacity(file.identity.len());
        for (index, entry) in file.identity.into_iter().enumerate() {
            for (field, value) in [("label", &entry.label), ("id", &entry.id), ("name", &entry.name)] {
                if value.trim().is_empty() {
                    return Err(IdentityError::EmptyField { index, field });
                }
            }
            entries.push((
                entry.label,
                Identity {
                    id: entry.id,
                    name: entry.name,
                    position: entry.position,
                },
            ));
        }
        Self::from_entries(entries)
    }

    /// Load a TOML roster from disk.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        if !path.exists() {
            return Err(IdentityError::NotFound(path.display().to_string()));
        }
        let src = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), identities = table.len(), "loaded identity table");
        Ok(table)
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, label: &str) -> Option<&Identity> {
        self.by_label.get(label)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.by_label.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}
