use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use common::{
    DenormalizedKeyword, DocumentStore, FieldTermConfig, LexicalQuery, NewsDocument, Result,
};
use regex::Regex;

/// Picks distinguishing terms of a stored document and maps them back to
/// the words they were stemmed from.
pub struct KeywordExtractor {
    store: Arc<dyn DocumentStore>,
    fields: Vec<FieldTermConfig>,
}

impl KeywordExtractor {
    pub fn new(store: Arc<dyn DocumentStore>, fields: Vec<FieldTermConfig>) -> Self {
        Self { store, fields }
    }

    /// Title and body filters with their default thresholds.
    pub fn with_default_fields(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(
            store,
            vec![FieldTermConfig::title_default(), FieldTermConfig::body_default()],
        )
    }

    /// Union of the salient terms of every configured field, one store call
    /// per field. Empty when any field reports the document missing.
    pub fn get_salient_terms(&self, doc_id: &str) -> Result<Vec<String>> {
        let mut seen = AHashSet::new();
        let mut terms = Vec::new();
        for filter in &self.fields {
            let Some(stats) = self.store.term_vectors(doc_id, filter)? else {
                tracing::debug!(doc_id, field = %filter.field, "no term vectors");
                return Ok(Vec::new());
            };
            for stat in stats {
                if seen.insert(stat.term.clone()) {
                    terms.push(stat.term);
                }
            }
        }
        Ok(terms)
    }

    /// Boolean OR over title and body; empty when there are no salient terms.
    pub fn salient_query(&self, doc_id: &str) -> Result<LexicalQuery> {
        Ok(LexicalQuery::any_of(self.get_salient_terms(doc_id)?))
    }

    pub fn denormalized_salient_terms(
        &self,
        doc: &NewsDocument,
        keep_order: bool,
    ) -> Result<Vec<DenormalizedKeyword>> {
        let terms = self.get_salient_terms(&doc.id)?;
        Ok(denormalize_all(&terms, &doc.title, &doc.body, keep_order))
    }

    /// Surface forms of the salient terms in reading order, joined by
    /// spaces. This is the text both retrieval and features embed.
    pub fn keyword_query_text(&self, doc: &NewsDocument) -> Result<Option<String>> {
        let keywords = self.denormalized_salient_terms(doc, true)?;
        if keywords.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            keywords
                .iter()
                .map(|k| k.surface.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        ))
    }
}

/// Finds the word in `text` that `term` was stemmed from.
///
/// Matches `term` case-insensitively at a word start, followed by any word
/// characters. Without a match the last character is dropped and the search
/// repeats; a single character without a match gives up.
pub fn denormalize(term: &str, text: &str) -> Option<DenormalizedKeyword> {
    let mut prefix = term;
    loop {
        if prefix.is_empty() {
            return None;
        }
        let pattern = format!(r"(?i)\b{}\w*\b", regex::escape(prefix));
        if let Some(found) = Regex::new(&pattern).ok()?.find(text) {
            return Some(DenormalizedKeyword {
                surface: found.as_str().to_string(),
                offset: found.start(),
            });
        }
        let mut chars = prefix.chars();
        chars.next_back();
        if chars.as_str().is_empty() {
            return None;
        }
        prefix = chars.as_str();
    }
}

/// Denormalizes every term against `"{title} {body}"`, drops misses and
/// collapses equal surface forms onto their earliest offset. With
/// `keep_order` the result is sorted by offset, otherwise it follows `terms`.
pub fn denormalize_all(
    terms: &[String],
    title: &str,
    body: &str,
    keep_order: bool,
) -> Vec<DenormalizedKeyword> {
    let joined = format!("{title} {body}");
    let text = joined.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<DenormalizedKeyword> = Vec::new();
    let mut by_surface: AHashMap<String, usize> = AHashMap::new();
    for term in terms {
        let Some(keyword) = denormalize(term, text) else {
            continue;
        };
        match by_surface.get(&keyword.surface) {
            Some(&idx) => out[idx].offset = out[idx].offset.min(keyword.offset),
            None => {
                by_surface.insert(keyword.surface.clone(), out.len());
                out.push(keyword);
            }
        }
    }
    if keep_order {
        out.sort_by_key(|k| k.offset);
    }
    out
}
