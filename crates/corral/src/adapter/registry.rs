// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter registry and the compiled-in catalog.

use std::collections::HashMap;
use std::sync::Arc;

use super::shell::ShellAdapter;
use super::Adapter;

/// Registry of adapters keyed by their type string.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShellAdapter::default()));
        registry
    }

    /// Register an adapter, replacing any previous one with the same type.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.adapter_type().to_owned(), adapter);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.adapters.contains_key(kind)
    }

    /// Registered adapter type keys, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Resolve a named adapter module from the compiled-in catalog.
///
/// The wire protocol's `registerAdapters` command names modules; with no
/// runtime loading available, names map to built-in packs. Embedders with
/// custom adapters register them through [`AdapterRegistry::register`]
/// instead.
pub fn builtin_pack(name: &str) -> Option<Vec<Arc<dyn Adapter>>> {
    match name {
        "shell" => Some(vec![Arc::new(ShellAdapter::default())]),
        _ => None,
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
