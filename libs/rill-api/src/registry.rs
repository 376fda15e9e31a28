use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::batch::BatchPolicy;
use crate::config::{ConfigParam, ConfigValues};
use crate::error::PluginError;
use crate::output::{BatchOutput, Resources};

/// Description of an output type: identity, docs and config schema.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub summary: String,
    pub description: String,
    pub categories: Vec<String>,
    pub params: Vec<ConfigParam>,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: String::new(),
            description: String::new(),
            categories: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ConfigParam>) -> Self {
        self.params.extend(params);
        self
    }
}

/// What a factory hands back to the host.
pub struct BuiltOutput {
    pub output: Arc<dyn BatchOutput>,
    pub batch_policy: BatchPolicy,
    pub max_in_flight: usize,
}

impl std::fmt::Debug for BuiltOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltOutput")
            .field("batch_policy", &self.batch_policy)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

/// Factory: validated config + shared resources → output.
///
/// Must not perform I/O; connecting is the host's `connect` call.
pub type OutputFactory =
    Arc<dyn Fn(&ConfigValues, &Resources) -> Result<BuiltOutput, PluginError> + Send + Sync>;

/// A registered output type.
#[derive(Clone)]
pub struct Registration {
    pub spec: OutputSpec,
    pub factory: OutputFactory,
}

/// Registry of batch output types, keyed by name.
///
/// Filled explicitly by the host's composition root; nothing registers
/// itself on load.
#[derive(Default)]
pub struct OutputRegistry {
    outputs: RwLock<HashMap<String, Registration>>,
}

impl std::fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRegistry")
            .field("outputs", &self.names())
            .finish()
    }
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output type. Fails if the name is taken.
    pub fn register_batch_output<F>(&self, spec: OutputSpec, factory: F) -> Result<(), PluginError>
    where
        F: Fn(&ConfigValues, &Resources) -> Result<BuiltOutput, PluginError> + Send + Sync + 'static,
    {
        let mut guard = self.write();
        if guard.contains_key(&spec.name) {
            return Err(PluginError::config(format!(
                "output '{}' is already registered",
                spec.name
            )));
        }
        tracing::debug!(output = %spec.name, params = spec.params.len(), "registered batch output");
        guard.insert(
            spec.name.clone(),
            Registration {
                spec,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Registration> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        match self.outputs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("output registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        match self.outputs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("output registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
