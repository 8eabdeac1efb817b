use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use synlogos_core::AgentConfig;
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "synlogos.json";

/// Contents of `synlogos.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model as `provider/model`.
    pub model: String,
    pub provider: BTreeMap<String, ProviderConfig>,
    pub agent: BTreeMap<String, AgentTypeConfig>,
    /// Files appended to the system prompt, relative to the config file.
    pub instructions: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub cost: CostConfig,
    pub runtime: AgentConfig,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub options: ProviderOptions,
    /// Model aliases. An object value may name the real model in `model`.
    pub models: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOptions {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTypeConfig {
    pub model: String,
    pub instructions: String,
}

/// Price per 1k tokens, used for the session cost line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Provider endpoint and model chosen for this run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAgent {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub instructions: String,
}

impl Config {
    /// Candidate locations, in search order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE), PathBuf::from(".synlogos.json")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".synlogos.json"));
        }
        paths
    }

    /// Loads `explicit` when given, otherwise the first existing file from
    /// [`Config::search_paths`].
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = Self::search_paths()
            .into_iter()
            .find(|path| path.exists())
            .ok_or_else(|| {
                anyhow!("Could not find {} in the current directory or home directory", CONFIG_FILE)
            })?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Contents of the configured instruction files. Unreadable files are
    /// skipped.
    pub fn load_instructions(&self) -> Vec<String> {
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        self.instructions
            .iter()
            .filter_map(|file| {
                let path = base.join(file);
                match std::fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!("Skipping instructions file {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Picks provider and model: a known agent type first, then the model
    /// override, then the default model. Missing API keys fall back to
    /// `<PROVIDER>_API_KEY` from the environment.
    pub fn resolve(&self, agent_type: Option<&str>, model_override: Option<&str>) -> Result<ResolvedAgent> {
        self.resolve_with(agent_type, model_override, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(
        &self,
        agent_type: Option<&str>,
        model_override: Option<&str>,
        env: F,
    ) -> Result<ResolvedAgent>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent = agent_type.and_then(|name| self.agent.get(name));
        let (spec, instructions) = match (agent, model_override.filter(|m| !m.trim().is_empty())) {
            (Some(agent), _) => (agent.model.as_str(), agent.instructions.clone()),
            (None, Some(model)) => (model, String::new()),
            (None, None) => (self.model.as_str(), String::new()),
        };
        if let (Some(name), None) = (agent_type, agent) {
            warn!("Unknown agent type {}, using the model setting instead", name);
        }

        let (provider_name, alias) = split_model(spec)
            .ok_or_else(|| anyhow!("Invalid model format: {:?}. Expected 'provider/model'", spec))?;
        let provider = self
            .provider
            .get(provider_name)
            .ok_or_else(|| anyhow!("Unknown provider: {}", provider_name))?;
        if provider.options.base_url.trim().is_empty() {
            bail!("Provider {} has no options.baseURL", provider_name);
        }

        let model = match provider.models.get(alias) {
            Some(Value::Object(options)) => options
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(alias)
                .to_string(),
            _ => alias.to_string(),
        };
        let api_key = provider
            .options
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| env(&format!("{}_API_KEY", provider_name.to_uppercase())))
            .filter(|key| !key.is_empty());

        Ok(ResolvedAgent {
            provider: provider_name.to_string(),
            model,
            base_url: provider.options.base_url.clone(),
            api_key,
            instructions,
        })
    }
}

/// Splits `provider/model`; the model part may itself contain slashes.
pub fn split_model(spec: &str) -> Option<(&str, &str)> {
    let (provider, model) = spec.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}
