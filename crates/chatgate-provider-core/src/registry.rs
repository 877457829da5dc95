use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{ModelDescriptor, RouteTarget, parse_model_name};
use crate::provider::ProviderAdapter;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("model name `{name}` registered by both `{first}` and `{second}`")]
    Collision {
        name: String,
        first: String,
        second: String,
    },
}

/// Immutable after startup: the union of every adapter's supported models.
pub struct ModelRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    by_public_name: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Fails fast on public-name collisions across adapters.
    pub fn build(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Result<Self, RegistryError> {
        let mut by_public_name: HashMap<String, ModelDescriptor> = HashMap::new();
        let mut adapter_map = HashMap::new();
        for adapter in adapters {
            for descriptor in adapter.supported_models() {
                if let Some(existing) = by_public_name.get(&descriptor.public_name) {
                    return Err(RegistryError::Collision {
                        name: descriptor.public_name,
                        first: existing.provider_id.clone(),
                        second: descriptor.provider_id,
                    });
                }
                by_public_name.insert(descriptor.public_name.clone(), descriptor);
            }
            adapter_map.insert(adapter.provider_id().to_string(), adapter);
        }
        Ok(Self {
            adapters: adapter_map,
            by_public_name,
        })
    }

    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        let mut models: Vec<ModelDescriptor> = self.by_public_name.values().cloned().collect();
        models.sort_by(|a, b| a.public_name.cmp(&b.public_name));
        models
    }

    /// Map a public model string to its adapter and route target. Exact
    /// matches win; otherwise suffixes are stripped and the remaining base
    /// must exist.
    pub fn resolve(&self, public_name: &str) -> Option<(Arc<dyn ProviderAdapter>, RouteTarget)> {
        let (descriptor, suffix_flags) = match self.by_public_name.get(public_name) {
            Some(descriptor) => (descriptor, Default::default()),
            None => {
                let parsed = parse_model_name(public_name);
                let descriptor = self.by_public_name.get(&parsed.base)?;
                (descriptor, parsed.flags)
            }
        };
        let adapter = self.adapters.get(&descriptor.provider_id)?.clone();
        let mut flags = descriptor.feature_flags.clone();
        flags.extend(suffix_flags);
        Some((
            adapter,
            RouteTarget {
                public_name: public_name.to_string(),
                descriptor: descriptor.clone(),
                flags,
            },
        ))
    }

    pub fn adapter(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }
}
