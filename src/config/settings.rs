use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::clients::RetryPolicy;
use crate::clients::ollama::DEFAULT_BASE_URL;
use crate::tools::retrieval::{DEFAULT_NAMESPACES, DEFAULT_TOP_K};

/// Config files picked up automatically, in priority order
pub const AUTO_CONFIG_PATHS: [&str; 2] = [".ops-pilot/config.yaml", "ops-pilot.yaml"];

/// Main CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryPolicy,
    pub approval: ApprovalConfig,
    pub store: StoreConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ollama server URL
    pub base_url: String,
    /// Chat model (e.g., "qwen2.5:7b")
    pub model: String,
    pub temperature: f64,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "qwen2.5:7b".to_string(),
            temperature: 0.0,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama server URL
    pub base_url: String,
    /// Embedding model; must match the one used to index the knowledge base
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Pinecone index data-plane host (e.g., "rag-abc123.svc.us-east-1.pinecone.io")
    pub index_host: String,
    /// Pinecone API key; usually supplied through PINECONE_API_KEY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Namespaces queried for every search, in result order
    pub namespaces: Vec<String>,
    /// Documents per namespace
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_host: String::new(),
            api_key: None,
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Hours before a pending approval expires; null disables expiry
    pub ttl_hours: Option<u64>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { ttl_hours: Some(24) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per session
    /// Defaults to ~/.config/ops-pilot/sessions/
    pub sessions_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ops-pilot/sessions"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptsConfig {
    /// Stage prompt override file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl CliConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: CliConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if file doesn't exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// First auto-detected config file under `base_dir`, if any.
    pub fn detect(base_dir: &Path) -> Option<PathBuf> {
        AUTO_CONFIG_PATHS
            .iter()
            .map(|p| base_dir.join(p))
            .find(|p| p.exists())
    }

    /// Load from an explicit path or an auto-detected file, then apply
    /// environment overrides.
    pub fn load_with_env(explicit: Option<&Path>, base_dir: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::detect(base_dir) {
                Some(path) => {
                    tracing::debug!("Using config from {:?}", path);
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `OPS_PILOT_*` and `PINECONE_API_KEY` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPS_PILOT_GENERATION_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = get("OPS_PILOT_GENERATION_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("OPS_PILOT_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = get("OPS_PILOT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("OPS_PILOT_INDEX_HOST") {
            self.retrieval.index_host = v;
        }
        if let Some(v) = get("PINECONE_API_KEY") {
            self.retrieval.api_key = Some(v);
        }
        if let Some(v) = get("OPS_PILOT_SESSIONS_DIR") {
            self.store.sessions_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OPS_PILOT_APPROVAL_TTL_HOURS") {
            match v.trim() {
                "none" | "never" | "0" => self.approval.ttl_hours = None,
                hours => match hours.parse() {
                    Ok(h) => self.approval.ttl_hours = Some(h),
                    Err(_) => tracing::warn!(
                        "Ignoring invalid OPS_PILOT_APPROVAL_TTL_HOURS value '{}'",
                        hours
                    ),
                },
            }
        }
    }
}
