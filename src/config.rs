use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub expertise: ExpertiseConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Path of the SQLite graph database.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Directory for repository clones; defaults to a sibling of the DB file.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Default history cap when the caller does not pass one.
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
    /// Tried in order when resolving the default branch head.
    #[serde(default = "default_branch_candidates")]
    pub branch_candidates: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_commits: default_max_commits(),
            branch_candidates: default_branch_candidates(),
        }
    }
}

fn default_max_commits() -> usize {
    500
}
fn default_branch_candidates() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// `"disabled"` or `"openai"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Per-call deadline for the completion provider.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_classify_retries")]
    pub max_retries: u32,
    /// Bounded worker pool size for per-commit classification.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_classify_retries(),
            workers: default_workers(),
        }
    }
}

impl ClassifierConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_classify_retries() -> u32 {
    2
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpertiseConfig {
    /// How many expertise labels each developer keeps.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ExpertiseConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Write attempts before a graph failure becomes fatal.
    #[serde(default = "default_graph_retries")]
    pub max_retries: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_retries: default_graph_retries(),
        }
    }
}

fn default_graph_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// How long terminal jobs stay queryable before purging.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_commits")]
    pub max_commits: usize,
    #[serde(default = "default_chat_developers")]
    pub max_developers: usize,
    #[serde(default = "default_chat_milestones")]
    pub max_milestones: usize,
    /// Upper bound on the assembled context blob.
    #[serde(default = "default_context_chars")]
    pub max_context_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_commits: default_chat_commits(),
            max_developers: default_chat_developers(),
            max_milestones: default_chat_milestones(),
            max_context_chars: default_context_chars(),
        }
    }
}

fn default_chat_commits() -> usize {
    5
}
fn default_chat_developers() -> usize {
    5
}
fn default_chat_milestones() -> usize {
    3
}
fn default_context_chars() -> usize {
    6000
}

impl Config {
    /// Default configuration rooted at the current directory, used when
    /// no config file is given.
    pub fn default_local() -> Self {
        Self {
            storage: StorageConfig {
                path: PathBuf::from("repolens.sqlite"),
            },
            git: GitConfig::default(),
            classifier: ClassifierConfig::default(),
            expertise: ExpertiseConfig::default(),
            graph: GraphConfig::default(),
            jobs: JobsConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.git.max_commits == 0 {
        anyhow::bail!("git.max_commits must be > 0");
    }
    if config.classifier.workers == 0 {
        anyhow::bail!("classifier.workers must be > 0");
    }
    if config.expertise.top_k == 0 {
        anyhow::bail!("expertise.top_k must be > 0");
    }
    if config.graph.max_retries == 0 {
        anyhow::bail!("graph.max_retries must be > 0");
    }

    match config.classifier.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.classifier.model.is_none() {
                anyhow::bail!(
                    "classifier.model must be specified when provider is '{}'",
                    config.classifier.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
