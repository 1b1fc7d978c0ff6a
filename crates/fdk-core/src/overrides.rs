// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local flag overrides.
//!
//! Overrides supply flag values from a local source (an in-memory map
//! or a JSON file) and either replace the remote configuration
//! entirely or merge with it in a chosen precedence order. The merge
//! happens on the decoded entry set, before interning and evaluator
//! construction, so the rest of the pipeline never distinguishes
//! overridden entries.

use crate::wire::{EntryNode, RootNode, Value};
use fdk_error::{ErrorKind, FlagError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// How override entries combine with the remote configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideBehavior {
    /// Overrides are the entire configuration; no HTTP fetching.
    LocalOnly,
    /// Remote entries are fetched; overrides win on key collision.
    LocalOverRemote,
    /// Remote entries are fetched and win on key collision.
    RemoteOverLocal,
}

/// Simplified override file shape: `{"flags": {"name": value}}`.
#[derive(Debug, Deserialize)]
struct SimplifiedFile {
    flags: HashMap<String, serde_json::Value>,
}

/// A local override source bound to a merge behavior.
#[derive(Debug, Clone)]
pub struct FlagOverrides {
    behavior: OverrideBehavior,
    entries: HashMap<String, EntryNode>,
}

impl FlagOverrides {
    /// Build overrides from a map of flag name to typed value.
    ///
    /// Entry types are inferred from the value kinds.
    #[must_use]
    pub fn from_map(behavior: OverrideBehavior, map: HashMap<String, Value>) -> Self {
        let entries = map
            .iter()
            .map(|(name, value)| (name.clone(), EntryNode::from_value(value)))
            .collect();
        Self { behavior, entries }
    }

    /// Load overrides from a JSON file.
    ///
    /// Both the simplified `{"flags": {...}}` shape and the full wire
    /// shape are accepted; the shape is detected from the document.
    pub fn from_file(behavior: OverrideBehavior, path: impl AsRef<Path>) -> Result<Self, FlagError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            FlagError::new(
                ErrorKind::MalformedConfig,
                format!("failed to read override file {}", path.display()),
            )
            .with_source(e)
        })?;

        let doc: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            FlagError::new(
                ErrorKind::MalformedConfig,
                format!("override file {} is not valid JSON", path.display()),
            )
            .with_source(e)
        })?;

        let entries = if doc.get("flags").is_some() {
            let simplified: SimplifiedFile = serde_json::from_value(doc).map_err(|e| {
                FlagError::new(
                    ErrorKind::MalformedConfig,
                    format!("override file {} has an invalid flags map", path.display()),
                )
                .with_source(e)
            })?;
            let mut entries = HashMap::with_capacity(simplified.flags.len());
            for (name, raw) in &simplified.flags {
                let value = Value::from_json(raw, None).ok_or_else(|| {
                    FlagError::new(
                        ErrorKind::MalformedConfig,
                        format!("override flag {name:?} has an unsupported value shape"),
                    )
                })?;
                entries.insert(name.clone(), EntryNode::from_value(&value));
            }
            entries
        } else {
            let root: RootNode = serde_json::from_value(doc).map_err(|e| {
                FlagError::new(
                    ErrorKind::MalformedConfig,
                    format!("override file {} does not match the wire shape", path.display()),
                )
                .with_source(e)
            })?;
            root.entries
        };

        Ok(Self { behavior, entries })
    }

    /// The configured merge behavior.
    #[must_use]
    pub fn behavior(&self) -> OverrideBehavior {
        self.behavior
    }

    /// The override entries in wire form.
    #[must_use]
    pub fn entry_nodes(&self) -> &HashMap<String, EntryNode> {
        &self.entries
    }

    /// Merge the override entries into a decoded remote entry set.
    pub(crate) fn apply(&self, remote: &mut HashMap<String, EntryNode>) {
        match self.behavior {
            OverrideBehavior::LocalOnly => {
                *remote = self.entries.clone();
            }
            OverrideBehavior::LocalOverRemote => {
                for (name, node) in &self.entries {
                    remote.insert(name.clone(), node.clone());
                }
            }
            OverrideBehavior::RemoteOverLocal => {
                for (name, node) in &self.entries {
                    remote.entry(name.clone()).or_insert_with(|| node.clone());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
