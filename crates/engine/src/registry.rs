//! Engines keyed by `(domain, calculation_mode)`.

use std::collections::HashMap;
use std::sync::Arc;

use hazrisk_core::params::{CalculationDomain, HazardMode, RiskMode};

use crate::engine::ComputationEngine;
use crate::reference::ReferenceEngine;

#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: HashMap<(CalculationDomain, String), Arc<dyn ComputationEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a reference engine for every known mode.
    pub fn with_reference_engines() -> Self {
        let mut registry = Self::new();
        for mode in HazardMode::ALL {
            registry.register(
                CalculationDomain::Hazard,
                mode.as_str(),
                Arc::new(ReferenceEngine::hazard(mode)),
            );
        }
        for mode in RiskMode::ALL {
            registry.register(
                CalculationDomain::Risk,
                mode.as_str(),
                Arc::new(ReferenceEngine::risk(mode)),
            );
        }
        registry
    }

    /// Register (or replace) the engine for a mode.
    pub fn register(
        &mut self,
        domain: CalculationDomain,
        mode: &str,
        engine: Arc<dyn ComputationEngine>,
    ) {
        self.engines.insert((domain, mode.to_string()), engine);
    }

    pub fn get(&self, domain: CalculationDomain, mode: &str) -> Option<Arc<dyn ComputationEngine>> {
        self.engines.get(&(domain, mode.to_string())).cloned()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .engines
            .keys()
            .map(|(domain, mode)| format!("{domain}/{mode}"))
            .collect();
        keys.sort();
        f.debug_struct("EngineRegistry").field("engines", &keys).finish()
    }
}
