use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::{Config, Credentials};
use crate::error::SiroccoError;
use crate::provider::minimax::MinimaxVideoAdapter;
use crate::provider::openai::OpenAiImagesAdapter;
use crate::provider::{DispatchMode, ProviderAdapter};
use crate::task::MediaKind;

/// Backend families the registry can construct adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    OpenAi,
    Minimax,
}

impl ProviderFamily {
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Minimax => "minimax",
        }
    }

    pub fn mode(self) -> DispatchMode {
        match self {
            Self::OpenAi => DispatchMode::Synchronous,
            Self::Minimax => DispatchMode::Asynchronous,
        }
    }
}

/// Static configuration for one model name.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Provider-side model id, substituted into the backend request.
    pub model_id: String,
    pub family: ProviderFamily,
    pub kind: MediaKind,
    pub description: String,
}

/// One row of `describe_available` output.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub model_id: String,
    pub provider: String,
    pub kind: MediaKind,
    pub mode: DispatchMode,
    pub description: String,
}

/// A model name resolved to the adapter responsible for it.
#[derive(Clone)]
pub struct ResolvedModel {
    pub model_id: String,
    pub provider: String,
    pub kind: MediaKind,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model_id", &self.model_id)
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps model names to adapters. Adapters are constructed lazily, once per
/// backend family, from the credentials present at startup; resolution itself
/// never performs network calls.
pub struct ProviderRegistry {
    models: HashMap<String, ModelSpec>,
    credentials: Credentials,
    custom: HashMap<String, (MediaKind, Arc<dyn ProviderAdapter>)>,
    adapters: Mutex<HashMap<ProviderFamily, Arc<dyn ProviderAdapter>>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            models: config.models.clone(),
            credentials: config.credentials.clone(),
            custom: HashMap::new(),
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Register an adapter for a model name outside the builtin families.
    /// The adapter is used as-is, bypassing credential checks.
    pub fn register_custom(
        &mut self,
        name: &str,
        kind: MediaKind,
        adapter: Arc<dyn ProviderAdapter>,
    ) {
        self.custom.insert(name.to_string(), (kind, adapter));
    }

    pub fn resolve(&self, model: &str) -> Result<ResolvedModel, SiroccoError> {
        if let Some((kind, adapter)) = self.custom.get(model) {
            return Ok(ResolvedModel {
                model_id: model.to_string(),
                provider: adapter.name().to_string(),
                kind: *kind,
                adapter: adapter.clone(),
            });
        }
        let spec = self.models.get(model).ok_or_else(|| {
            SiroccoError::UnknownModel {
                model: model.to_string(),
                suggestions: self.suggest_models(model),
            }
        })?;
        let adapter = self.adapter_for(spec.family, model)?;
        Ok(ResolvedModel {
            model_id: spec.model_id.clone(),
            provider: spec.family.name().to_string(),
            kind: spec.kind,
            adapter,
        })
    }

    /// Models with usable credentials, sorted by name for stable output.
    pub fn describe_available(&self) -> Vec<ModelDescriptor> {
        let mut out: Vec<ModelDescriptor> = self
            .models
            .iter()
            .filter(|(_, spec)| self.credential_for(spec.family).is_some())
            .map(|(name, spec)| ModelDescriptor {
                name: name.clone(),
                model_id: spec.model_id.clone(),
                provider: spec.family.name().to_string(),
                kind: spec.kind,
                mode: spec.family.mode(),
                description: spec.description.clone(),
            })
            .collect();
        out.extend(self.custom.iter().map(|(name, (kind, adapter))| {
            ModelDescriptor {
                name: name.clone(),
                model_id: name.clone(),
                provider: adapter.name().to_string(),
                kind: *kind,
                mode: adapter.mode(),
                description: String::new(),
            }
        }));
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Suggest similar model names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest_models(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .models
            .keys()
            .chain(self.custom.keys())
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .cloned()
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    fn credential_for(&self, family: ProviderFamily) -> Option<&str> {
        match family {
            ProviderFamily::OpenAi => self.credentials.openai.as_deref(),
            ProviderFamily::Minimax => self.credentials.minimax.as_deref(),
        }
    }

    fn adapter_for(
        &self,
        family: ProviderFamily,
        model: &str,
    ) -> Result<Arc<dyn ProviderAdapter>, SiroccoError> {
        let mut adapters = self
            .adapters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(adapter) = adapters.get(&family) {
            return Ok(adapter.clone());
        }
        let key = self
            .credential_for(family)
            .ok_or_else(|| SiroccoError::AdapterUnavailable {
                model: model.to_string(),
                provider: family.name().to_string(),
            })?;
        let adapter: Arc<dyn ProviderAdapter> = match family {
            ProviderFamily::OpenAi => Arc::new(OpenAiImagesAdapter::new(key)),
            ProviderFamily::Minimax => Arc::new(MinimaxVideoAdapter::new(key)),
        };
        adapters.insert(family, adapter.clone());
        Ok(adapter)
    }
}
