// src/relevance.rs
//! Keyword relevance: weighted lexicon, term matching, scoring and filtering.

use anyhow::{Context, Result};
use metrics::counter;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::article::Article;

pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";
pub const DEFAULT_MIN_SCORE: u8 = 10;
pub const MAX_SCORE: u8 = 100;

const TITLE_POINTS: f64 = 10.0;
const DESCRIPTION_POINTS: f64 = 5.0;
const DISTINCT_BONUS: f64 = 5.0;

/// Built-in bilingual AI lexicon.
pub const AI_KEYWORDS: &[&str] = &[
    // general
    "AI",
    "人工知能",
    "artificial intelligence",
    "ML",
    "機械学習",
    "machine learning",
    "deep learning",
    "ディープラーニング",
    "深層学習",
    "neural network",
    "ニューラルネットワーク",
    // techniques
    "NLP",
    "自然言語処理",
    "natural language processing",
    "computer vision",
    "コンピュータビジョン",
    "画像認識",
    "reinforcement learning",
    "強化学習",
    "transformer",
    "トランスフォーマー",
    // models and services
    "ChatGPT",
    "GPT-4",
    "GPT",
    "OpenAI",
    "Claude",
    "Anthropic",
    "Gemini",
    "Bard",
    "Google AI",
    "LLM",
    "Large Language Model",
    "大規模言語モデル",
    "Stable Diffusion",
    "Midjourney",
    "DALL-E",
    // companies and labs
    "DeepMind",
    "Meta AI",
    "Microsoft AI",
    "Hugging Face",
    "Cohere",
    "Mistral",
    // ethics and regulation
    "AI ethics",
    "AI倫理",
    "AI規制",
    "AGI",
    "Artificial General Intelligence",
    "汎用人工知能",
];

/// Letters and spaces only: matched on ASCII word boundaries, so kana and
/// kanji next to a Latin term count as a boundary. Anything else (digits,
/// hyphens, CJK) is matched as a plain substring.
fn is_word_term(term: &str) -> bool {
    !term.trim().is_empty() && term.chars().all(|c| c.is_ascii_alphabetic() || c == ' ')
}

fn term_regex(term: &str) -> Result<Regex> {
    let escaped = regex::escape(term.trim());
    let pattern = if is_word_term(term) {
        format!(r"(?i)(?-u:\b){escaped}(?-u:\b)")
    } else {
        format!("(?i){escaped}")
    };
    Regex::new(&pattern).with_context(|| format!("compiling term `{term}`"))
}

#[derive(Debug, Clone)]
pub struct Term {
    pub text: String,
    pub weight: f64,
    re: Regex,
}

impl Term {
    pub fn new(text: &str, weight: f64) -> Result<Self> {
        Ok(Self {
            text: text.trim().to_string(),
            weight,
            re: term_regex(text)?,
        })
    }

    pub fn occurrences(&self, haystack: &str) -> usize {
        self.re.find_iter(haystack).count()
    }

    pub fn matches(&self, haystack: &str) -> bool {
        self.re.is_match(haystack)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LexiconFile {
    /// Replaces the built-in list when present.
    terms: Option<Vec<String>>,
    #[serde(default)]
    weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct Lexicon {
    terms: Vec<Term>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Lexicon {
    /// Terms with weight 1.
    pub fn builtin() -> Self {
        Self {
            terms: AI_KEYWORDS
                .iter()
                .filter_map(|t| Term::new(t, 1.0).ok())
                .collect(),
        }
    }

    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, f64)>) -> Result<Self> {
        let mut terms: Vec<Term> = Vec::new();
        for (text, weight) in entries {
            if text.trim().is_empty() {
                continue;
            }
            if let Some(t) = terms.iter_mut().find(|t| t.text == text.trim()) {
                t.weight = weight;
                continue;
            }
            terms.push(Term::new(text, weight)?);
        }
        Ok(Self { terms })
    }

    /// `terms = [...]` replaces the built-in list; `[weights]` overrides or
    /// adds individual terms.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(s).context("parsing lexicon toml")?;
        let base: Vec<String> = match file.terms {
            Some(t) => t,
            None => AI_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        };
        let mut entries: Vec<(&str, f64)> = base.iter().map(|t| (t.as_str(), 1.0)).collect();
        entries.extend(file.weights.iter().map(|(k, w)| (k.as_str(), *w)));
        Self::new(entries)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading lexicon {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// `$RELEVANCE_CONFIG_PATH` when set and loadable, else the built-in list.
    pub fn from_env_or_builtin() -> Self {
        let Ok(p) = std::env::var(ENV_RELEVANCE_CONFIG_PATH) else {
            return Self::builtin();
        };
        match Self::from_path(Path::new(&p)) {
            Ok(lex) => {
                info!(target: "relevance", path = %p, terms = lex.len(), "lexicon loaded");
                lex
            }
            Err(e) => {
                warn!(target: "relevance", path = %p, error = %format!("{e:#}"), "lexicon unusable; using built-in");
                Self::builtin()
            }
        }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: u8,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    lexicon: Lexicon,
}

impl RelevanceScorer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn evaluate(&self, article: &Article) -> Evaluation {
        let mut raw = 0.0f64;
        let mut matched = Vec::new();
        for term in self.lexicon.terms() {
            let in_title = term.occurrences(&article.title);
            let in_desc = term.occurrences(&article.description);
            if in_title + in_desc == 0 {
                continue;
            }
            raw += (in_title as f64 * TITLE_POINTS + in_desc as f64 * DESCRIPTION_POINTS)
                * term.weight;
            matched.push(term.text.clone());
        }
        if matched.len() > 1 {
            raw += DISTINCT_BONUS * matched.len() as f64;
        }
        let score = raw.round().clamp(0.0, MAX_SCORE as f64) as u8;
        Evaluation { score, matched }
    }

    pub fn score(&self, article: &Article) -> u8 {
        self.evaluate(article).score
    }

    /// Any lexicon term appears in title or description.
    pub fn is_relevant(&self, article: &Article) -> bool {
        self.lexicon
            .terms()
            .iter()
            .any(|t| t.matches(&article.title) || t.matches(&article.description))
    }

    /// Score every article, keep `score >= min_score`, highest score first
    /// (stable for ties).
    pub fn filter(&self, articles: Vec<Article>, min_score: u8) -> Vec<Article> {
        let total = articles.len();
        let mut kept: Vec<Article> = articles
            .into_iter()
            .filter_map(|a| {
                let s = self.score(&a);
                (s >= min_score).then(|| a.with_score(s))
            })
            .collect();
        kept.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        counter!("ingest_filtered_total").increment((total - kept.len()) as u64);
        debug!(target: "relevance", total, kept = kept.len(), min_score, "relevance filter applied");
        kept
    }
}

/// Unscored inclusion filter: keep articles matching any of `keywords`.
pub fn filter_by_keywords(articles: Vec<Article>, keywords: &[&str]) -> Vec<Article> {
    let terms: Vec<Term> = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .filter_map(|k| Term::new(k, 1.0).ok())
        .collect();
    articles
        .into_iter()
        .filter(|a| {
            terms
                .iter()
                .any(|t| t.matches(&a.title) || t.matches(&a.description))
        })
        .collect()
}
