//! Monitor configuration loaded from a YAML file.
//!
//! The file carries the query list, the lookback window, scheduling and
//! reporting knobs, and the full keyword table used by the scorer. Every
//! field except `queries` has a default, so the smallest useful file is:
//!
//! ```yaml
//! queries:
//!   - { kind: search, value: "claude programming" }
//!   - { kind: channel, value: UCsBjURrPoezykLs9EqgamOA }
//! ```
//!
//! Loading and validation are separate steps so that command-line overrides
//! can be applied in between. A config that fails [`MonitorConfig::validate`]
//! must never reach the scheduler.

use crate::models::{Query, QueryKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration of a monitor deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Channels and search terms, processed in this order.
    #[serde(default)]
    pub queries: Vec<Query>,

    /// Only videos published within this many days are requested.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Cap on results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results_per_query: u32,

    /// Hours between two cycles in continuous mode.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// New records scoring at least this much are handed to the report hook.
    #[serde(default = "default_notability_threshold")]
    pub notability_threshold: u8,

    /// Records scoring below this are counted but not stored. 0 stores everything.
    #[serde(default)]
    pub store_min_score: u8,

    /// Number of top new records kept in a run summary.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// How many queries may be fetched at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Upper bound on `lookback_days` (one hundred years).
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

fn default_lookback_days() -> u32 {
    7
}

fn default_max_results() -> u32 {
    50
}

fn default_interval_hours() -> u64 {
    6
}

fn default_notability_threshold() -> u8 {
    50
}

fn default_top_n() -> usize {
    10
}

fn default_concurrency() -> usize {
    1
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            lookback_days: default_lookback_days(),
            max_results_per_query: default_max_results(),
            interval_hours: default_interval_hours(),
            notability_threshold: default_notability_threshold(),
            store_min_score: 0,
            top_n: default_top_n(),
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Read and parse a config file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Replace the query list with the given channels followed by search terms.
    ///
    /// Empty entries are dropped. Nothing happens when both lists are empty.
    pub fn apply_query_overrides(&mut self, channels: &[String], search_terms: &[String]) {
        let channels = channels
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(Query::channel);
        let terms = search_terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(Query::search);
        let queries: Vec<Query> = channels.chain(terms).collect();
        if !queries.is_empty() {
            self.queries = queries;
        }
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lookback_days))
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queries.is_empty() {
            return Err(ConfigError::Invalid(
                "no queries configured (add channels or search terms)".to_string(),
            ));
        }
        for query in &self.queries {
            if query.value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty {} query value",
                    query.kind
                )));
            }
            if query.kind == QueryKind::Channel && query.value.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!(
                    "channel id {:?} contains whitespace",
                    query.value
                )));
            }
        }
        if self.lookback_days == 0 || self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::Invalid(format!(
                "lookback_days must be within 1..={MAX_LOOKBACK_DAYS}"
            )));
        }
        if self.max_results_per_query == 0 {
            return Err(ConfigError::Invalid(
                "max_results_per_query must be at least 1".to_string(),
            ));
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Invalid("interval_hours must be at least 1".to_string()));
        }
        if self.notability_threshold > 100 || self.store_min_score > 100 {
            return Err(ConfigError::Invalid(
                "score thresholds must be within 0..=100".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        self.scoring.validate()
    }
}

/// Retry policy for transient fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay before the first retry; 0 retries immediately.
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_max_retries() -> usize {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: 0,
        }
    }
}

/// How a keyword is looked for in text. Matching is always case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Anywhere in the text, including inside longer words.
    #[default]
    Substring,
    /// Only as a standalone token, delimited by non-word characters.
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordPattern {
    pub pattern: String,
    pub weight: u32,
    #[serde(default, rename = "match")]
    pub mode: MatchMode,
}

impl KeywordPattern {
    pub fn substring(pattern: &str, weight: u32) -> Self {
        Self {
            pattern: pattern.to_string(),
            weight,
            mode: MatchMode::Substring,
        }
    }

    pub fn token(pattern: &str, weight: u32) -> Self {
        Self {
            pattern: pattern.to_string(),
            weight,
            mode: MatchMode::Token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    /// The category matches when its weighted sum exceeds this value.
    #[serde(default)]
    pub threshold: u32,
    pub keywords: Vec<KeywordPattern>,
}

/// Keyword table and tuning constants for the relevance scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    #[serde(default = "default_title_multiplier")]
    pub title_multiplier: u32,
    #[serde(default = "default_description_multiplier")]
    pub description_multiplier: u32,
    /// Weighted total that maps to a score of 100.
    #[serde(default = "default_normalization")]
    pub normalization: f64,
    /// Generic AI-coding keywords that add to the score without tagging.
    #[serde(default)]
    pub generic: Vec<KeywordPattern>,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryConfig>,
}

fn default_title_multiplier() -> u32 {
    2
}

fn default_description_multiplier() -> u32 {
    1
}

fn default_normalization() -> f64 {
    60.0
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.normalization.is_finite() && self.normalization > 0.0) {
            return Err(ConfigError::Invalid(
                "scoring.normalization must be a positive number".to_string(),
            ));
        }
        if self.title_multiplier == 0 && self.description_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "at least one of title_multiplier/description_multiplier must be non-zero"
                    .to_string(),
            ));
        }
        check_patterns("generic", &self.generic)?;
        for (name, category) in &self.categories {
            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
            if !valid_name {
                return Err(ConfigError::Invalid(format!(
                    "category name {name:?} must be lowercase ascii, digits, '-' or '_'"
                )));
            }
            if category.keywords.is_empty() {
                return Err(ConfigError::Invalid(format!("category {name:?} has no keywords")));
            }
            check_patterns(name, &category.keywords)?;
        }
        Ok(())
    }
}

fn check_patterns(group: &str, patterns: &[KeywordPattern]) -> Result<(), ConfigError> {
    for p in patterns {
        if p.pattern.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("empty keyword in {group:?}")));
        }
        if p.weight == 0 {
            return Err(ConfigError::Invalid(format!(
                "keyword {:?} in {group:?} must have a positive weight",
                p.pattern
            )));
        }
    }
    Ok(())
}

impl Default for ScoringConfig {
    /// The stock AI-coding keyword table.
    fn default() -> Self {
        use KeywordPattern as K;

        let generic = vec![
            K::substring("ai coding", 6),
            K::substring("ai programming", 6),
            K::substring("code with ai", 6),
            K::substring("ai pair programming", 6),
            K::substring("code generation", 5),
            K::substring("ai debugging", 5),
            K::substring("code review ai", 5),
            K::substring("ai refactoring", 5),
            K::substring("automated coding", 5),
            K::substring("ai assistant", 4),
            K::substring("intelligent code completion", 4),
            K::substring("artificial intelligence", 3),
            K::substring("machine learning", 2),
            K::substring("deep learning", 2),
            K::token("ai", 2),
            K::token("coding", 1),
            K::token("programming", 1),
            K::token("developer", 1),
            K::token("software", 1),
        ];

        let category = |threshold: u32, keywords: Vec<KeywordPattern>| CategoryConfig {
            threshold,
            keywords,
        };

        let mut categories = BTreeMap::new();
        categories.insert(
            "claude".to_string(),
            category(
                2,
                vec![
                    K::token("claude", 5),
                    K::token("anthropic", 4),
                    K::substring("claude code", 3),
                ],
            ),
        );
        categories.insert(
            "chatgpt".to_string(),
            category(
                2,
                vec![
                    K::token("chatgpt", 5),
                    K::substring("chat gpt", 5),
                    K::token("openai", 4),
                    K::token("gpt-4", 4),
                    K::token("gpt-3", 3),
                    K::token("gpt", 3),
                ],
            ),
        );
        categories.insert(
            "copilot".to_string(),
            category(
                2,
                vec![
                    K::substring("github copilot", 5),
                    K::token("copilot", 5),
                    K::substring("microsoft copilot", 3),
                ],
            ),
        );
        categories.insert(
            "llm-dev".to_string(),
            category(
                3,
                vec![
                    K::token("llm", 3),
                    K::token("llms", 3),
                    K::substring("large language model", 4),
                    K::substring("prompt engineering", 3),
                    K::token("langchain", 4),
                    K::token("rag", 3),
                    K::substring("fine-tuning", 3),
                    K::substring("fine tuning", 3),
                    K::token("embeddings", 3),
                    K::substring("ai agent", 3),
                ],
            ),
        );
        categories.insert(
            "tutorial".to_string(),
            category(
                2,
                vec![
                    K::token("tutorial", 3),
                    K::substring("how to", 2),
                    K::substring("crash course", 3),
                    K::substring("for beginners", 3),
                    K::token("guide", 2),
                    K::token("course", 2),
                    K::token("lesson", 2),
                    K::token("learn", 1),
                ],
            ),
        );
        categories.insert(
            "tools".to_string(),
            category(
                2,
                vec![
                    K::token("vscode", 3),
                    K::substring("vs code", 3),
                    K::token("cursor", 3),
                    K::token("ide", 2),
                    K::token("extension", 2),
                    K::token("plugin", 2),
                    K::token("editor", 1),
                ],
            ),
        );
        categories.insert(
            "review".to_string(),
            category(
                2,
                vec![
                    K::token("review", 3),
                    K::token("comparison", 3),
                    K::token("benchmark", 3),
                    K::token("vs", 2),
                    K::token("versus", 2),
                ],
            ),
        );
        categories.insert(
            "advanced".to_string(),
            category(
                2,
                vec![
                    K::token("advanced", 3),
                    K::token("expert", 2),
                    K::token("enterprise", 2),
                    K::token("scaling", 2),
                    K::token("production", 2),
                ],
            ),
        );

        Self {
            title_multiplier: default_title_multiplier(),
            description_multiplier: default_description_multiplier(),
            normalization: default_normalization(),
            generic,
            categories,
        }
    }
}
