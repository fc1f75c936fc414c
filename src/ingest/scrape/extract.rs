//! Selector resolution and per-element field extraction.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::dates::parse_date;
use crate::article::{normalize_text, truncate_chars};
use crate::config::{AcceptancePolicy, ExtractionProfile};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
/// Strict titles must be longer than this; shorter ones are nav glyphs and icons.
const MIN_STRICT_TITLE_CHARS: usize = 2;

const TITLE_SELECTORS: &[&str] = &[
    "h2, h3",
    ".title, [class*=\"title\"]",
    "h1, h4, h5, h6",
    "[class*=\"headline\"], [data-testid*=\"title\"]",
];
/// Tried after [`TITLE_SELECTORS`] under the loose policy only.
const LOOSE_TITLE_SELECTORS: &[&str] = &[".action", "a"];
const DESCRIPTION_SELECTORS: &[&str] = &[
    "p",
    ".description, .excerpt, .summary",
    "[class*=\"desc\"], [class*=\"summary\"]",
];
const DATE_SELECTORS: &[&str] = &["time", ".date, [class*=\"date\"]"];

fn compiled(cell: &'static OnceCell<Vec<Selector>>, list: &[&str]) -> &'static [Selector] {
    cell.get_or_init(|| list.iter().map(|s| Selector::parse(s).unwrap()).collect())
}

fn title_selectors() -> &'static [Selector] {
    static C: OnceCell<Vec<Selector>> = OnceCell::new();
    compiled(&C, TITLE_SELECTORS)
}
fn loose_title_selectors() -> &'static [Selector] {
    static C: OnceCell<Vec<Selector>> = OnceCell::new();
    compiled(&C, LOOSE_TITLE_SELECTORS)
}
fn description_selectors() -> &'static [Selector] {
    static C: OnceCell<Vec<Selector>> = OnceCell::new();
    compiled(&C, DESCRIPTION_SELECTORS)
}
fn date_selectors() -> &'static [Selector] {
    static C: OnceCell<Vec<Selector>> = OnceCell::new();
    compiled(&C, DATE_SELECTORS)
}
fn anchor_selector() -> &'static Selector {
    static C: OnceCell<Selector> = OnceCell::new();
    C.get_or_init(|| Selector::parse("a[href]").unwrap())
}

/// One accepted listing element, before it becomes an `Article`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// First candidate that parses and matches at least one element.
pub fn resolve_selector(doc: &Html, candidates: &[String]) -> Option<(String, Selector)> {
    for raw in candidates {
        let sel = match Selector::parse(raw) {
            Ok(s) => s,
            Err(e) => {
                debug!(target: "scrape", selector = %raw, error = %e, "invalid selector skipped");
                continue;
            }
        };
        let hits = doc.select(&sel).count();
        if hits > 0 {
            debug!(target: "scrape", selector = %raw, hits, "selector resolved");
            return Some((raw.clone(), sel));
        }
        debug!(target: "scrape", selector = %raw, "selector matched nothing");
    }
    None
}

/// Walk elements matching `item` in document order and keep those the
/// profile's acceptance policy allows, up to `profile.max_items`.
pub fn extract_entries(
    doc: &Html,
    item: &Selector,
    page_url: &Url,
    profile: &ExtractionProfile,
) -> Vec<PageEntry> {
    let loose = profile.acceptance == AcceptancePolicy::Loose;
    let domain = profile
        .domain
        .clone()
        .or_else(|| page_url.host_str().map(str::to_string));

    let mut out = Vec::new();
    for (index, el) in doc.select(item).enumerate() {
        if out.len() >= profile.max_items {
            break;
        }

        let mut title = first_text(el, title_selectors());
        if title.is_empty() && loose {
            title = first_text(el, loose_title_selectors());
        }
        if title.is_empty() && loose {
            title = first_text_line(el);
        }
        let link = element_link(el, page_url);

        let accepted = if loose {
            title.chars().count() > 1
                || matches!((&link, &domain), (Some(l), Some(d)) if l.contains(d.as_str()))
        } else {
            title.chars().count() > MIN_STRICT_TITLE_CHARS && link.is_some()
        };
        if !accepted {
            debug!(target: "scrape", index, "element rejected");
            continue;
        }

        let full_text = if loose { element_text(el) } else { String::new() };
        let mut description = first_text(el, description_selectors());
        if description.is_empty() && loose {
            description = full_text.clone();
        }
        let mut published_at = element_date(el);
        if published_at.is_none() && loose {
            published_at = parse_date(&full_text);
        }
        if title.is_empty() {
            title = format!("Entry {}", index + 1);
        }

        out.push(PageEntry {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            link: link.unwrap_or_else(|| page_url.to_string()),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            published_at,
        });
    }
    out
}

fn first_text(el: ElementRef<'_>, selectors: &[Selector]) -> String {
    for sel in selectors {
        if let Some(found) = el.select(sel).next() {
            let t = element_text(found);
            if !t.is_empty() {
                return t;
            }
        }
    }
    String::new()
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_text_line(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(normalize_text)
        .unwrap_or_default()
}

/// `href` of the first descendant anchor, else the element's own `href`,
/// resolved against the page URL.
fn element_link(el: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = el
        .select(anchor_selector())
        .next()
        .and_then(|a| a.value().attr("href"))
        .or_else(|| el.value().attr("href"))?
        .trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

fn element_date(el: ElementRef<'_>) -> Option<DateTime<Utc>> {
    for sel in date_selectors() {
        for found in el.select(sel) {
            if let Some(d) = found.value().attr("datetime").and_then(parse_date) {
                return Some(d);
            }
            if let Some(d) = parse_date(&element_text(found)) {
                return Some(d);
            }
        }
    }
    None
}
