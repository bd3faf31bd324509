use crate::error::{EvalError, Result};
use crate::models::{EvaluatorSpec, ItemSchema};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const ENDPOINT_VAR: &str = "AZURE_EXISTING_AIPROJECT_ENDPOINT";
pub const DEPLOYMENT_VAR: &str = "AZURE_AI_AGENT_DEPLOYMENT_NAME";
pub const AGENT_NAME_VAR: &str = "AZURE_AI_AGENT_NAME";
pub const API_VERSION_VAR: &str = "AZURE_AI_API_VERSION";
pub const TOKEN_VAR: &str = "AZURE_AI_PROJECT_TOKEN";
pub const API_KEY_VAR: &str = "AZURE_AI_API_KEY";
pub const MODEL_ENDPOINT_VAR: &str = "AZURE_OPENAI_ENDPOINT";

pub const DEFAULT_API_VERSION: &str = "2025-11-15-preview";

/// Authenticated identity used for every remote call
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Entra ID access token sent as `Authorization: Bearer`
    Bearer(String),
    /// Resource key sent as `api-key`
    ApiKey(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
        }
    }
}

/// Process-wide settings, read once at startup and passed explicitly
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project endpoint URL, without trailing slash
    pub endpoint: String,
    /// Model deployment used by the evaluators (and by direct generation)
    pub deployment_name: String,
    /// Agent answering queries during inline generation
    pub agent_name: Option<String>,
    pub api_version: String,
    pub credential: Credential,
    /// Endpoint for direct model calls; defaults to the project endpoint
    pub model_endpoint: String,
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| get(name).ok_or_else(|| EvalError::MissingEnv(name.to_string()));

        let endpoint = require(ENDPOINT_VAR)?.trim_end_matches('/').to_string();
        let deployment_name = require(DEPLOYMENT_VAR)?;

        let credential = match (get(TOKEN_VAR), get(API_KEY_VAR)) {
            (Some(token), _) => Credential::Bearer(token),
            (None, Some(key)) => Credential::ApiKey(key),
            (None, None) => {
                return Err(EvalError::config(format!(
                    "no credential: set {TOKEN_VAR} or {API_KEY_VAR}"
                )));
            }
        };

        let model_endpoint = get(MODEL_ENDPOINT_VAR)
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| endpoint.clone());

        Ok(Self {
            endpoint,
            deployment_name,
            agent_name: get(AGENT_NAME_VAR),
            api_version: get(API_VERSION_VAR).unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            credential,
            model_endpoint,
        })
    }

    /// Agent name, required when generating through an agent
    pub fn require_agent_name(&self) -> Result<&str> {
        self.agent_name
            .as_deref()
            .ok_or_else(|| EvalError::MissingEnv(AGENT_NAME_VAR.to_string()))
    }
}

/// Load a dotenv file: the explicit one if given, else `.env` when present
pub fn load_env_file(path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file: {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded environment file");
        }
        None => {
            if let Ok(path) = dotenvy::dotenv() {
                tracing::info!(path = %path.display(), "loaded environment file");
            }
        }
    }
    Ok(())
}

/// One evaluator entry of an evaluators file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluatorEntry {
    pub name: String,
    /// Remote evaluator identifier, e.g. `builtin.relevance`
    pub evaluator_name: String,
    pub data_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub initialization_parameters: BTreeMap<String, toml::Value>,
}

/// Evaluators (and optionally the item schema) loaded from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluatorsFile {
    #[serde(default)]
    pub schema: Option<ItemSchema>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorEntry>,
}

impl EvaluatorsFile {
    /// Load an evaluators file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read evaluators file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML evaluators: {}", path.display()))
    }

    /// Convert entries to specs; `deployment_name` fills a missing deployment parameter
    pub fn evaluator_specs(&self, deployment_name: &str) -> Vec<EvaluatorSpec> {
        self.evaluators
            .iter()
            .map(|entry| {
                let mut init_parameters: BTreeMap<String, Value> = entry
                    .initialization_parameters
                    .iter()
                    .filter_map(|(key, value)| {
                        serde_json::to_value(value).ok().map(|v| (key.clone(), v))
                    })
                    .collect();
                if entry.evaluator_name.starts_with("builtin.") {
                    init_parameters
                        .entry("deployment_name".to_string())
                        .or_insert_with(|| Value::String(deployment_name.to_string()));
                }

                EvaluatorSpec {
                    name: entry.name.clone(),
                    evaluator_kind: entry.evaluator_name.clone(),
                    field_mapping: entry.data_mapping.clone(),
                    init_parameters,
                }
            })
            .collect()
    }
}
