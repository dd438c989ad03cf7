//! Pure retrieval algorithms: merging, score fusion, page organization and
//! reference extraction.
//!
//! The async half of hybrid retrieval (embedding queries, issuing the
//! primary and contextual searches concurrently, fetching special chunks)
//! lives in the application crate. Everything here is deterministic and
//! operates on already-fetched result sets.
//!
//! # Doc retrieval pipeline
//!
//! 1. Primary search for the transformed query with `k + 2` slack.
//! 2. Contextual search for `query + " " + editor_keywords` with `k`
//!    (only when the editor yields keywords).
//! 3. [`merge_results`]: primary then contextual, dedupe by id keeping the
//!    first occurrence, sort by similarity (desc, stable), truncate to `k`.
//! 4. Fetch `PAGE_SUMMARY` / `PAGE_EXAMPLES` for each page in the merge.
//! 5. [`organize_by_page`]: per page in first-appearance order, emit the
//!    summary, the examples block, then the page's ranked chunks.
//!
//! When lexical search is enabled, each dense result set is first fused
//! with its lexical counterpart by [`fuse_weighted`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{DocChunk, DocReference, ExampleProgram, ProgramReference, Ranked};

/// Extra candidates requested from the primary search so the merge has
/// slack after deduplication.
pub const PRIMARY_SLACK: usize = 2;

/// Dense weight used when fusing with lexical results.
pub const DEFAULT_DENSE_WEIGHT: f64 = 0.7;

/// Lexical weight used when fusing with dense results.
pub const DEFAULT_LEXICAL_WEIGHT: f64 = 0.3;

/// `PAGE_EXAMPLES` chunks at or above this many characters are not pulled
/// into the prompt.
pub const DEFAULT_PAGE_EXAMPLES_MAX_LEN: usize = 500;

/// The query used for the contextual pass, or `None` when the editor
/// contributed no keywords.
pub fn contextual_query(search_query: &str, editor_keywords: &str) -> Option<String> {
    let editor_keywords = editor_keywords.trim();
    if editor_keywords.is_empty() {
        None
    } else {
        Some(format!("{} {}", search_query, editor_keywords))
    }
}

/// Merge primary and contextual results into one ranked set of at most `k`.
///
/// Primary results win on duplicate ids. The sort is stable, so equal
/// similarities keep their concatenation order.
pub fn merge_results<T: Ranked>(primary: Vec<T>, contextual: Vec<T>, k: usize) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut merged: Vec<T> = primary
        .into_iter()
        .chain(contextual)
        .filter(|item| seen.insert(item.id().to_string()))
        .collect();
    merged.sort_by(|a, b| {
        b.similarity()
            .partial_cmp(&a.similarity())
            .unwrap_or(Ordering::Equal)
    });
    merged.truncate(k);
    merged
}

/// Fuse dense and lexical result sets by summing weighted scores per id.
///
/// A record that appears in only one set contributes only that set's
/// weighted score. Output is sorted by fused score descending, ties by id.
pub fn fuse_weighted<T: Ranked>(
    dense: Vec<T>,
    lexical: Vec<T>,
    dense_weight: f64,
    lexical_weight: f64,
) -> Vec<T> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut records: Vec<T> = Vec::new();

    for (items, weight) in [(dense, dense_weight), (lexical, lexical_weight)] {
        for item in items {
            let id = item.id().to_string();
            let weighted = item.similarity() * weight;
            match scores.get_mut(&id) {
                Some(score) => *score += weighted,
                None => {
                    scores.insert(id, weighted);
                    records.push(item);
                }
            }
        }
    }

    for record in &mut records {
        if let Some(score) = scores.get(record.id()) {
            record.set_similarity(*score);
        }
    }
    records.sort_by(|a, b| {
        b.similarity()
            .partial_cmp(&a.similarity())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id().cmp(b.id()))
    });
    records
}

/// Distinct page names in order of first appearance.
pub fn pages_in_order(docs: &[DocChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    docs.iter()
        .filter(|d| seen.insert(d.page_name.as_str()))
        .map(|d| d.page_name.clone())
        .collect()
}

/// Whole-page chunks fetched for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSpecials {
    pub summary: Option<DocChunk>,
    pub examples: Option<DocChunk>,
}

/// Whether a fetched `PAGE_EXAMPLES` chunk is short enough to include.
pub fn page_examples_fit(chunk: &DocChunk, max_len: usize) -> bool {
    chunk.content.chars().count() < max_len
}

/// Group merged chunks by page, placing each page's special chunks first.
///
/// Pages keep their first-appearance order from `merged`; within a page the
/// ranked chunks keep their merged order. Ids are never emitted twice, so a
/// special chunk that also ranked in the merge appears once, up front.
pub fn organize_by_page(
    merged: Vec<DocChunk>,
    specials: &HashMap<String, PageSpecials>,
) -> Vec<DocChunk> {
    let pages = pages_in_order(&merged);
    let mut by_page: HashMap<String, Vec<DocChunk>> = HashMap::new();
    for chunk in merged {
        by_page.entry(chunk.page_name.clone()).or_default().push(chunk);
    }

    let mut emitted = HashSet::new();
    let mut out = Vec::new();
    for page in pages {
        if let Some(special) = specials.get(&page) {
            for chunk in [&special.summary, &special.examples].into_iter().flatten() {
                if emitted.insert(chunk.id.clone()) {
                    out.push(chunk.clone());
                }
            }
        }
        for chunk in by_page.remove(&page).unwrap_or_default() {
            if emitted.insert(chunk.id.clone()) {
                out.push(chunk);
            }
        }
    }
    out
}

/// Doc references for UI attribution, deduplicated by `page_url` in
/// first-appearance order.
pub fn doc_references(docs: &[DocChunk]) -> Vec<DocReference> {
    let mut seen = HashSet::new();
    docs.iter()
        .filter(|d| seen.insert(d.page_url.as_str()))
        .map(|d| DocReference {
            page_name: d.page_name.clone(),
            page_url: d.page_url.clone(),
        })
        .collect()
}

/// Program references in merged order, deduplicated by id.
pub fn program_references(examples: &[ExampleProgram]) -> Vec<ProgramReference> {
    let mut seen = HashSet::new();
    examples
        .iter()
        .filter(|e| seen.insert(e.id.as_str()))
        .map(|e| ProgramReference {
            id: e.id.clone(),
            title: e.title.clone(),
            author_name: e.author_name.clone(),
            url: e.url.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PAGE_EXAMPLES, PAGE_SUMMARY};

    fn chunk(id: &str, page: &str, section: &str, sim: f64) -> DocChunk {
        DocChunk {
            id: id.to_string(),
            page_name: page.to_string(),
            page_url: format!("https://strudel.cc/learn/{}", page),
            section_title: section.to_string(),
            content: format!("content of {}", id),
            similarity: sim,
        }
    }

    fn example(id: &str, sim: f64) -> ExampleProgram {
        ExampleProgram {
            id: id.to_string(),
            title: format!("title {}", id),
            code: "s(\"bd\")".to_string(),
            similarity: sim,
            ..Default::default()
        }
    }

    fn ids<T: Ranked>(items: &[T]) -> Vec<&str> {
        items.iter().map(|i| i.id()).collect()
    }

    #[test]
    fn test_contextual_query_skipped_for_empty_editor() {
        assert_eq!(contextual_query("drums", "  "), None);
        assert_eq!(
            contextual_query("drums", "bd hh"),
            Some("drums bd hh".to_string())
        );
    }

    #[test]
    fn test_merge_dedupes_keeping_primary() {
        let primary = vec![chunk("a", "p", "s", 0.9), chunk("b", "p", "s", 0.5)];
        let contextual = vec![chunk("a", "p", "s", 0.99), chunk("c", "q", "s", 0.7)];
        let merged = merge_results(primary, contextual, 5);
        assert_eq!(ids(&merged), vec!["a", "c", "b"]);
        assert_eq!(merged[0].similarity, 0.9);
    }

    #[test]
    fn test_merge_truncates_and_sorts() {
        let primary = vec![
            chunk("a", "p", "s", 0.1),
            chunk("b", "p", "s", 0.8),
            chunk("c", "p", "s", 0.3),
        ];
        let merged = merge_results(primary, vec![], 2);
        assert_eq!(ids(&merged), vec!["b", "c"]);
        assert!(merge_results::<DocChunk>(vec![chunk("a", "p", "s", 1.0)], vec![], 0).is_empty());
    }

    #[test]
    fn test_merge_is_stable_for_ties() {
        let primary = vec![chunk("z", "p", "s", 0.5), chunk("a", "p", "s", 0.5)];
        let merged = merge_results(primary, vec![], 5);
        assert_eq!(ids(&merged), vec!["z", "a"]);
    }

    #[test]
    fn test_fuse_weighted_sums_per_id() {
        let dense = vec![example("a", 1.0), example("b", 0.5)];
        let lexical = vec![example("b", 1.0), example("c", 1.0)];
        let fused = fuse_weighted(dense, lexical, 0.7, 0.3);
        assert_eq!(ids(&fused), vec!["a", "b", "c"]);
        assert!((fused[0].similarity - 0.7).abs() < 1e-9);
        assert!((fused[1].similarity - 0.65).abs() < 1e-9);
        assert!((fused[2].similarity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_organize_places_specials_first_per_page() {
        let merged = vec![
            chunk("e1", "effects", "Filters", 0.9),
            chunk("t1", "tonal", "Scales", 0.8),
            chunk("e2", "effects", "Delay", 0.7),
        ];
        let mut specials = HashMap::new();
        specials.insert(
            "effects".to_string(),
            PageSpecials {
                summary: Some(chunk("es", "effects", PAGE_SUMMARY, 0.0)),
                examples: Some(chunk("ex", "effects", PAGE_EXAMPLES, 0.0)),
            },
        );
        specials.insert(
            "tonal".to_string(),
            PageSpecials {
                summary: Some(chunk("ts", "tonal", PAGE_SUMMARY, 0.0)),
                examples: None,
            },
        );

        let organized = organize_by_page(merged, &specials);
        assert_eq!(ids(&organized), vec!["es", "ex", "e1", "e2", "ts", "t1"]);
    }

    #[test]
    fn test_organize_does_not_duplicate_ranked_special() {
        let merged = vec![
            chunk("es", "effects", PAGE_SUMMARY, 0.9),
            chunk("e1", "effects", "Filters", 0.8),
        ];
        let mut specials = HashMap::new();
        specials.insert(
            "effects".to_string(),
            PageSpecials {
                summary: Some(chunk("es", "effects", PAGE_SUMMARY, 0.0)),
                examples: None,
            },
        );
        let organized = organize_by_page(merged, &specials);
        assert_eq!(ids(&organized), vec!["es", "e1"]);
    }

    #[test]
    fn test_page_examples_length_limit() {
        let mut c = chunk("x", "p", PAGE_EXAMPLES, 0.0);
        c.content = "a".repeat(499);
        assert!(page_examples_fit(&c, 500));
        c.content = "a".repeat(500);
        assert!(!page_examples_fit(&c, 500));
    }

    #[test]
    fn test_doc_references_dedupe_by_url() {
        let docs = vec![
            chunk("a", "effects", "s", 0.9),
            chunk("b", "effects", "t", 0.8),
            chunk("c", "tonal", "s", 0.7),
        ];
        let refs = doc_references(&docs);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].page_name, "effects");
        assert_eq!(refs[1].page_name, "tonal");
    }

    #[test]
    fn test_program_references_keep_order() {
        let refs = program_references(&[example("b", 0.9), example("a", 0.5), example("b", 0.1)]);
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
