// src/config/mod.rs
pub mod sources;

pub use sources::{
    AcceptancePolicy, AppConfig, CacheSettings, DeliverySettings, ExtractionProfile,
    FilterSettings, SourceConfig, SourceKind,
};

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ENV_CONFIG_PATH: &str = "NEWS_RELAY_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/sources.toml";
pub const DEFAULT_JSON_PATH: &str = "config/sources.json";

/// Load configuration from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?;
    info!(
        target: "config",
        path = %path.display(),
        sources = cfg.sources.len(),
        "config loaded"
    );
    Ok(cfg)
}

/// Resolve the config path using env var + fallbacks:
/// 1) $NEWS_RELAY_CONFIG
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn resolve_config_path() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return Ok(Some(pb));
        }
    }
    Ok(None)
}

/// Load configuration, degrading to an empty source set on any problem.
/// Never fails: a broken config must not take the pipeline down.
pub fn load_config_default() -> AppConfig {
    let loaded = resolve_config_path().and_then(|p| match p {
        Some(path) => load_config_from(&path).map(Some),
        None => Ok(None),
    });
    match loaded {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            warn!(target: "config", "no config file found; running with no sources");
            AppConfig::default().finalize()
        }
        Err(e) => {
            warn!(target: "config", error = %format!("{e:#}"), "config unusable; running with no sources");
            AppConfig::default().finalize()
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    // JSON first only when hinted or content clearly looks like JSON.
    let try_json_first = hint_ext == "json" || s.trim_start().starts_with('{');
    if try_json_first {
        if let Ok(v) = parse_json(s) {
            return Ok(v);
        }
    }
    match parse_toml(s) {
        Ok(v) => Ok(v),
        Err(toml_err) if !try_json_first => parse_json(s).map_err(|_| toml_err),
        Err(toml_err) => {
            // Report the JSON error when JSON was the expected format.
            parse_json(s).map_err(|json_err| json_err.context(toml_err.to_string()))
        }
    }
}

fn parse_toml(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(s)?;
    Ok(cfg.finalize())
}

fn parse_json(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = serde_json::from_str(s)?;
    Ok(cfg.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_layouts_parse() {
        let toml = r#"
[filter]
min_relevance_score = 20

[[sources]]
name = "TechCrunch AI"
url = "https://techcrunch.com/category/artificial-intelligence/feed/"
type = "rss"

[[sources]]
name = "League of Legends"
url = "https://www.leagueoflegends.com/en-us/news/tags/patch-notes/"
selector = "a[href*='patch']"
profile = "riot"

[profiles.riot]
selectors = ['[data-testid*="card"]']
acceptance = "loose"
domain = "leagueoflegends.com"
"#;
        let cfg = parse_config(toml, "toml").unwrap();
        assert_eq!(cfg.filter.min_relevance_score, 20);
        assert_eq!(cfg.filter.max_articles_per_fetch, 10);
        assert_eq!(cfg.sources[0].kind(), SourceKind::Structured);
        assert_eq!(cfg.sources[1].kind(), SourceKind::Dynamic);
        assert_eq!(cfg.sources[1].extraction.acceptance, AcceptancePolicy::Loose);

        let json = r#"{
  "rssFeeds": [{"name": "Feed", "url": "https://f.test/rss", "enabled": true}],
  "gamePatches": [{"name": "Game", "url": "https://g.test", "selector": ".patch", "type": "static", "enabled": false}],
  "filterSettings": {"minRelevanceScore": 15, "maxArticlesPerFetch": 5}
}"#;
        let cfg = parse_config(json, "json").unwrap();
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.feed_urls(), vec!["https://f.test/rss".to_string()]);
        assert!(cfg.page_sources().is_empty(), "disabled page source is skipped");
        assert_eq!(cfg.filter.max_articles_per_fetch, 5);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_config("sources = [ this is not", "toml").is_err());
        assert!(parse_config("{ \"sources\": 3 }", "json").is_err());
    }
}
