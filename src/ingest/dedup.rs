use std::collections::HashSet;

use crate::article::Article;

/// Concatenate per-source batches in the order given.
pub fn merge(batches: Vec<Vec<Article>>) -> Vec<Article> {
    let total = batches.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for b in batches {
        out.extend(b);
    }
    out
}

/// Drop every article whose key (link, or title when the link is empty) was
/// already seen. First occurrence wins; relative order is preserved.
pub fn dedup(articles: Vec<Article>) -> Vec<Article> {
    let mut seen: HashSet<String> = HashSet::with_capacity(articles.len());
    articles
        .into_iter()
        .filter(|a| seen.insert(a.dedup_key().to_string()))
        .collect()
}

/// Newest first. Stable, so equal timestamps keep their input order.
pub fn sort_by_recency(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn a(link: &str, title: &str, day: u32) -> Article {
        Article {
            title: title.into(),
            link: link.into(),
            description: String::new(),
            published_at: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            author: String::new(),
            categories: vec![],
            source: "S".into(),
            origin_url: "https://s.test".into(),
            relevance_score: None,
        }
    }

    #[test]
    fn first_seen_wins_and_title_is_fallback_key() {
        let input = vec![
            a("https://x.test/1", "first", 1),
            a("", "no link", 2),
            a("https://x.test/1", "second copy", 3),
            a("", "no link", 4),
            a("https://x.test/2", "other", 5),
        ];
        let out = dedup(input.clone());
        let titles: Vec<_> = out.iter().map(|x| x.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "no link", "other"]);
        assert_eq!(dedup(out.clone()), out, "idempotent");
        assert!(out.len() <= input.len());
    }

    #[test]
    fn merge_keeps_batch_order_and_sort_is_stable() {
        let mut all = merge(vec![
            vec![a("https://x.test/a", "a", 1), a("https://x.test/b", "b", 2)],
            vec![],
            vec![a("https://x.test/c", "c", 2)],
        ]);
        assert_eq!(all.len(), 3);
        sort_by_recency(&mut all);
        let links: Vec<_> = all.iter().map(|x| x.title.as_str()).collect();
        assert_eq!(links, vec!["b", "c", "a"]);
    }
}
