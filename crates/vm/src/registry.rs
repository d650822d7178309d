//! The import registry: the global symbol table that imports resolve
//! against.
//!
//! Natives are registered by the host and never removed. Script exports
//! are published by the first live instance of a module and removed when
//! that instance is destroyed. The first registration of a name wins.

use std::collections::HashMap;

use scom_common::{InstanceId, NativeId, Pointer, RuntimeValue};
use tracing::{debug, warn};

/// What an import name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportTarget {
    Native(NativeId),
    ScriptFunction { instance: InstanceId, address: u32 },
    ScriptData(Pointer),
}

impl ImportTarget {
    /// The value an import fixup resolves to.
    pub fn value(&self) -> RuntimeValue {
        match *self {
            ImportTarget::Native(id) => RuntimeValue::NativeFunc(id),
            ImportTarget::ScriptFunction { instance, address } => {
                RuntimeValue::ScriptFunc { instance, address }
            }
            ImportTarget::ScriptData(p) => RuntimeValue::GlobalPtr(p),
        }
    }
}

/// A registry entry and who contributed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub target: ImportTarget,
    /// Publishing instance; `None` for host natives.
    pub owner: Option<InstanceId>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `name` unless it is already taken. Returns whether it was added.
    pub fn register(
        &mut self,
        name: &str,
        target: ImportTarget,
        owner: Option<InstanceId>,
    ) -> bool {
        if let Some(existing) = self.entries.get(name) {
            warn!(
                name,
                existing_owner = ?existing.owner,
                rejected_owner = ?owner,
                "symbol already registered; keeping the first registration"
            );
            return false;
        }
        self.entries
            .insert(name.to_string(), RegistryEntry { target, owner });
        true
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    /// Resolve an import name: the exact name first, then the name with a
    /// trailing `^N` argument-count suffix removed.
    pub fn resolve(&self, name: &str) -> Option<ImportTarget> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry.target);
        }
        strip_suffix(name, '^')
            .and_then(|base| self.entries.get(base))
            .map(|e| e.target)
    }

    /// Remove every entry contributed by `owner`. Returns how many.
    pub fn remove_owned(&mut self, owner: InstanceId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.owner != Some(owner));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(instance = owner.0, removed, "unpublished exports");
        }
        removed
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// `name` without a trailing `<marker>digits` suffix, if it has one.
pub fn strip_suffix(name: &str, marker: char) -> Option<&str> {
    let (base, digits) = name.rsplit_once(marker)?;
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(base)
}
