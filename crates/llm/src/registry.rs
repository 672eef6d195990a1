//! Model Dispatch Registry
//!
//! Maps logical model identifiers to backend constructors. The registry is
//! assembled once at startup through [`BackendRegistryBuilder`] and is
//! read-only afterwards; each entry constructs its backend lazily on first
//! resolve and shares that instance with every later request.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anthropic::AnthropicBackend;
use crate::openai::OpenAICompatibleBackend;
use crate::provider::ChatBackend;
use crate::types::{LlmError, LlmResult, ProviderConfig, ProviderKind};

/// Constructor invoked at most once per registered model (see [`BackendRegistry::resolve`]).
pub type BackendConstructor = Arc<dyn Fn() -> LlmResult<Arc<dyn ChatBackend>> + Send + Sync>;

/// Identity of a logical model as presented to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub model_id: String,
    pub bot_id: String,
    pub bot_name: String,
}

/// A backend handle plus the identity used for the `model` event.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub backend: Arc<dyn ChatBackend>,
    pub descriptor: BackendDescriptor,
}

impl std::fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("backend", &self.backend.name())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// One configured HTTP backend.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub descriptor: BackendDescriptor,
    pub provider: ProviderConfig,
}

struct Entry {
    descriptor: BackendDescriptor,
    constructor: BackendConstructor,
    instance: OnceLock<Arc<dyn ChatBackend>>,
}

/// Startup-time builder for [`BackendRegistry`].
#[derive(Default)]
pub struct BackendRegistryBuilder {
    entries: HashMap<String, Entry>,
}

impl BackendRegistryBuilder {
    /// Register a constructor. A later registration for the same model id
    /// replaces the earlier one.
    pub fn register<F>(mut self, descriptor: BackendDescriptor, constructor: F) -> Self
    where
        F: Fn() -> LlmResult<Arc<dyn ChatBackend>> + Send + Sync + 'static,
    {
        let model_id = descriptor.model_id.clone();
        let entry = Entry {
            descriptor,
            constructor: Arc::new(constructor),
            instance: OnceLock::new(),
        };
        self.entries.insert(model_id, entry);
        self
    }

    /// Register an already-built, shared backend.
    pub fn register_instance(
        self,
        descriptor: BackendDescriptor,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        self.register(descriptor, move || Ok(backend.clone()))
    }

    /// Register an HTTP backend from its provider configuration.
    pub fn register_spec(self, spec: BackendSpec) -> Self {
        let provider = spec.provider;
        self.register(spec.descriptor, move || {
            let backend: Arc<dyn ChatBackend> = match provider.provider {
                ProviderKind::Anthropic => Arc::new(AnthropicBackend::new(provider.clone())?),
                _ => Arc::new(OpenAICompatibleBackend::new(provider.clone())?),
            };
            Ok(backend)
        })
    }

    pub fn build(self) -> BackendRegistry {
        info!("[Registry] {} model backend(s) registered", self.entries.len());
        BackendRegistry {
            entries: self.entries,
        }
    }
}

/// Read-only model id → backend table, safe for concurrent resolution.
pub struct BackendRegistry {
    entries: HashMap<String, Entry>,
}

impl BackendRegistry {
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::default()
    }

    /// Build a registry of HTTP backends from configuration.
    pub fn from_specs(specs: impl IntoIterator<Item = BackendSpec>) -> Self {
        specs
            .into_iter()
            .fold(Self::builder(), |builder, spec| builder.register_spec(spec))
            .build()
    }

    /// Look up the backend for `model_id`, constructing it on first use.
    pub fn resolve(&self, model_id: &str, user_id: &str) -> LlmResult<ResolvedBackend> {
        let entry = self
            .entries
            .get(model_id)
            .ok_or_else(|| LlmError::ModelNotFound {
                model: model_id.to_string(),
            })?;

        let backend = match entry.instance.get() {
            Some(backend) => backend.clone(),
            None => {
                let built = (entry.constructor)()?;
                // A concurrent first resolve may have won; keep whichever is stored.
                let _ = entry.instance.set(built.clone());
                entry.instance.get().cloned().unwrap_or(built)
            }
        };

        debug!(
            model_id = %model_id,
            user_id = %user_id,
            backend = backend.name(),
            "[Registry] resolved backend"
        );
        Ok(ResolvedBackend {
            backend,
            descriptor: entry.descriptor.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
