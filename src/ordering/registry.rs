// src/ordering/registry.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::errors::{Result, ShepherdError};
use crate::fs::FileSystem;
use crate::ordering::graph::RoleCommandOrder;
use crate::ordering::table::StackDefinition;

/// A stack definition together with its compiled role command order.
#[derive(Debug)]
pub struct CompiledStack {
    pub definition: StackDefinition,
    pub order: RoleCommandOrder,
}

impl CompiledStack {
    pub fn compile(definition: StackDefinition) -> Result<Self> {
        let order = RoleCommandOrder::build(&definition)?;
        Ok(Self { definition, order })
    }

    pub fn id(&self) -> &str {
        self.order.stack()
    }
}

/// Read-mostly registry of compiled stacks keyed by stack id.
///
/// Readers get an `Arc` snapshot and never observe a half-built graph:
/// a new definition is compiled first and only then swapped in. A definition
/// that fails to compile leaves the previous entry untouched.
#[derive(Debug, Default)]
pub struct StackRegistry {
    stacks: RwLock<HashMap<String, Arc<CompiledStack>>>,
}

impl StackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and install (or replace) a stack definition.
    pub fn install(&self, definition: StackDefinition) -> Result<Arc<CompiledStack>> {
        let compiled = Arc::new(CompiledStack::compile(definition)?);
        let id = compiled.id().to_string();

        let mut guard = self
            .stacks
            .write()
            .map_err(|_| ShepherdError::Persistence("stack registry lock poisoned".to_string()))?;
        if guard.insert(id.clone(), Arc::clone(&compiled)).is_some() {
            info!(stack = %id, "replaced compiled role command order");
        } else {
            info!(stack = %id, "installed compiled role command order");
        }
        Ok(compiled)
    }

    pub fn get(&self, stack_id: &str) -> Result<Arc<CompiledStack>> {
        let guard = self
            .stacks
            .read()
            .map_err(|_| ShepherdError::Persistence("stack registry lock poisoned".to_string()))?;
        guard
            .get(stack_id)
            .cloned()
            .ok_or_else(|| ShepherdError::UnknownStack(stack_id.to_string()))
    }

    pub fn stack_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.stacks.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(_) => {
                warn!("stack registry lock poisoned; reporting no stacks");
                Vec::new()
            }
        };
        ids.sort();
        ids
    }

    /// Load every `*.toml` file in `dir` as a stack definition.
    ///
    /// Fails on the first invalid definition; a stack with a cyclic order is
    /// a fatal configuration error.
    pub fn load_dir(&self, fs: &dyn FileSystem, dir: &Path) -> Result<Vec<String>> {
        let mut entries = fs.read_dir(dir)?;
        entries.sort();

        let mut loaded = Vec::new();
        for path in entries {
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let contents = fs.read_to_string(&path)?;
            let definition = StackDefinition::from_toml_str(&contents).map_err(|e| {
                ShepherdError::ConfigError(format!("stack definition {:?}: {}", path, e))
            })?;
            let compiled = self.install(definition)?;
            loaded.push(compiled.id().to_string());
        }
        Ok(loaded)
    }
}
