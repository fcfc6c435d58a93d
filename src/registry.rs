//! Name → factory table for every collector compiled into the exporter.
//!
//! The table is filled once by the startup routine through an explicit call
//! list ([`Registry::builtin`]) and is only read afterwards. It carries no
//! locking: registration must finish before the table is shared.

use crate::collectors::{self, Collector, CollectorSettings, Factory};
use crate::errors::RegistryError;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<&'static str, Factory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.names())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in collector.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        collectors::register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// A second registration under the same name is a build defect.
    pub fn register(&mut self, name: &'static str, factory: Factory) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Conflict {
                name: name.to_string(),
            });
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Factory, RegistryError> {
        self.factories
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Build the active collector set in the requested order.
    ///
    /// Every name is resolved before any factory runs, so a typo fails fast.
    /// Each built collector's descriptors are checked against the exposition
    /// format here, so a bad metric name stops startup instead of a scrape.
    pub fn instantiate<S: AsRef<str>>(
        &self,
        names: &[S],
        settings: &CollectorSettings,
    ) -> Result<Vec<Box<dyn Collector>>, RegistryError> {
        let factories = names
            .iter()
            .map(|name| self.get(name.as_ref()).map(|f| (name.as_ref(), f)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut active = Vec::with_capacity(factories.len());
        for (name, factory) in factories {
            let collector = factory(settings).map_err(|source| RegistryError::Build {
                name: name.to_string(),
                source,
            })?;
            for desc in collector.describe() {
                desc.validate()
                    .map_err(|source| RegistryError::InvalidDescriptor {
                        name: name.to_string(),
                        metric: desc.fq_name.clone(),
                        source,
                    })?;
            }
            tracing::debug!(collector = name, "collector built");
            active.push(collector);
        }
        Ok(active)
    }
}
