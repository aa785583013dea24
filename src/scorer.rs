//! Keyword-weighted relevance scoring.
//!
//! The [`Scorer`] is built once from a [`ScoringConfig`] and is a pure
//! function of a video's title and description afterwards. For every group of
//! patterns it sums `weight × title_multiplier` for each pattern found in the
//! title and `weight × description_multiplier` for each pattern found in the
//! description; a pattern counts at most once per field.
//!
//! ```text
//! total = generic_sum + Σ category_sum   (categories whose sum > threshold)
//! score = clamp(round(total × 100 / normalization), 0, 100)
//! ```
//!
//! The matched categories become the record's tags.

use crate::config::{ConfigError, KeywordPattern, MatchMode, ScoringConfig};
use crate::models::RawVideo;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

/// Score and tags computed for one video.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relevance {
    pub score: u8,
    pub tags: BTreeSet<String>,
}

#[derive(Debug)]
struct CompiledPattern {
    regex: Regex,
    weight: u64,
}

#[derive(Debug)]
struct CompiledCategory {
    name: String,
    threshold: u64,
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug)]
pub struct Scorer {
    title_multiplier: u64,
    description_multiplier: u64,
    normalization: f64,
    generic: Vec<CompiledPattern>,
    categories: Vec<CompiledCategory>,
}

impl Scorer {
    /// Validate the table and compile every pattern.
    pub fn new(config: &ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let generic = compile_all(&config.generic)?;
        let categories = config
            .categories
            .iter()
            .map(|(name, category)| {
                Ok(CompiledCategory {
                    name: name.clone(),
                    threshold: u64::from(category.threshold),
                    patterns: compile_all(&category.keywords)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            title_multiplier: u64::from(config.title_multiplier),
            description_multiplier: u64::from(config.description_multiplier),
            normalization: config.normalization,
            generic,
            categories,
        })
    }

    pub fn score(&self, video: &RawVideo) -> Relevance {
        self.score_text(&video.title, &video.description)
    }

    /// Score raw text fields. Used directly when rescoring stored records.
    pub fn score_text(&self, title: &str, description: &str) -> Relevance {
        if title.trim().is_empty() && description.trim().is_empty() {
            return Relevance::default();
        }

        let mut total = self.weighted_sum(&self.generic, title, description);
        let mut tags = BTreeSet::new();

        for category in &self.categories {
            let sum = self.weighted_sum(&category.patterns, title, description);
            if sum > category.threshold {
                total += sum;
                tags.insert(category.name.clone());
            }
        }

        Relevance {
            score: self.normalize(total),
            tags,
        }
    }

    /// Names of all configured categories, in table order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    fn weighted_sum(&self, patterns: &[CompiledPattern], title: &str, description: &str) -> u64 {
        patterns
            .iter()
            .map(|p| {
                let mut sum = 0;
                if p.regex.is_match(title) {
                    sum += p.weight * self.title_multiplier;
                }
                if p.regex.is_match(description) {
                    sum += p.weight * self.description_multiplier;
                }
                sum
            })
            .sum()
    }

    fn normalize(&self, total: u64) -> u8 {
        let scaled = (total as f64 * 100.0 / self.normalization).round();
        scaled.clamp(0.0, 100.0) as u8
    }
}

fn compile_all(patterns: &[KeywordPattern]) -> Result<Vec<CompiledPattern>, ConfigError> {
    patterns.iter().map(compile).collect()
}

fn compile(pattern: &KeywordPattern) -> Result<CompiledPattern, ConfigError> {
    let escaped = regex::escape(pattern.pattern.trim());
    // \b misbehaves around non-word characters ("c++", "gpt-4."), so tokens are
    // delimited explicitly.
    let source = match pattern.mode {
        MatchMode::Substring => escaped,
        MatchMode::Token => format!(r"(?:^|[^\w]){escaped}(?:[^\w]|$)"),
    };
    let regex = RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("keyword {:?}: {e}", pattern.pattern)))?;

    Ok(CompiledPattern {
        regex,
        weight: u64::from(pattern.weight),
    })
}
