pub mod config;
pub mod error;
pub mod jsonl;
pub mod judgement;
pub mod stats;
pub mod store;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

pub use config::AppConfig;
pub use error::{EngineError, Result};
pub use jsonl::JsonLines;
pub use judgement::{Judgement, Reference};
pub use stats::IngestReport;
pub use store::DocumentStore;

/// Corpus language. Resolved once from configuration and used to pick the
/// stemming analyzer and the embedding model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    German,
    English,
}

impl Language {
    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "de" | "german" | "deutsch" => Some(Self::German),
            "en" | "english" => Some(Self::English),
            _ => None,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::German => "de",
            Self::English => "en",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "text")]
    pub body: String,
    #[serde(default, alias = "date", deserialize_with = "deserialize_published")]
    pub published: i64,
}

impl NewsDocument {
    /// Character length of title plus body.
    pub fn char_length(&self) -> usize {
        self.title.chars().count() + self.body.chars().count()
    }
}

fn deserialize_published<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPublished {
        Int(i64),
        Float(f64),
        Text(String),
        Missing(Option<()>),
    }

    match RawPublished::deserialize(deserializer)? {
        RawPublished::Int(v) => Ok(v),
        RawPublished::Float(v) => Ok(v as i64),
        RawPublished::Text(raw) => parse_published(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("unsupported published value: {raw}"))
        }),
        RawPublished::Missing(_) => Ok(0),
    }
}

/// Parses an integer timestamp or a `YYYY-MM-DD` / `DD-MM-YYYY` date into unix seconds.
pub fn parse_published(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    ["%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// A keyword recovered in its original casing together with its first byte
/// offset in the searched text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DenormalizedKeyword {
    pub surface: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredHit {
    pub id: String,
    pub score: f32,
}

/// One fused candidate. `None` means the channel did not produce the
/// candidate, which is different from a score of zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalCandidate {
    pub id: String,
    pub bm25_score: Option<f32>,
    pub cosine_score: Option<f32>,
}

pub const FEATURE_NAMES: [&str; 4] = ["bm25_score", "cosine_score", "doc_length", "published_after"];

/// Ranker input. Column order is fixed by [`FeatureVector::to_array`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub bm25_score: f32,
    pub cosine_score: f32,
    pub doc_length: f32,
    pub published_after: f32,
}

impl FeatureVector {
    pub const LEN: usize = FEATURE_NAMES.len();

    pub const fn to_array(&self) -> [f32; 4] {
        [
            self.bm25_score,
            self.cosine_score,
            self.doc_length,
            self.published_after,
        ]
    }

    pub const fn from_array(values: [f32; 4]) -> Self {
        Self {
            bm25_score: values[0],
            cosine_score: values[1],
            doc_length: values[2],
            published_after: values[3],
        }
    }
}

/// Term statistics filter for one document field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldTermConfig {
    pub field: String,
    pub min_term_freq: u32,
    pub min_doc_freq: u64,
    pub max_terms: usize,
}

impl FieldTermConfig {
    pub fn title_default() -> Self {
        Self {
            field: "title".to_string(),
            min_term_freq: 1,
            min_doc_freq: 1,
            max_terms: 3,
        }
    }

    pub fn body_default() -> Self {
        Self {
            field: "body".to_string(),
            min_term_freq: 2,
            min_doc_freq: 5,
            max_terms: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermStat {
    pub term: String,
    pub term_freq: u32,
    pub doc_freq: u64,
    pub score: f32,
}

/// Boolean OR query over the given fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LexicalQuery {
    pub terms: Vec<String>,
    pub fields: Vec<String>,
}

impl LexicalQuery {
    pub fn any_of(terms: Vec<String>) -> Self {
        Self {
            terms,
            fields: vec!["title".to_string(), "body".to_string()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn render(&self) -> String {
        self.terms.join(" OR ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_date_published_values() {
        let doc: NewsDocument =
            serde_json::from_str(r#"{"id":"a","title":"T","text":"B","published":"02-03-2020"}"#)
                .expect("doc");
        assert_eq!(doc.body, "B");
        assert_eq!(doc.published, parse_published("2020-03-02").expect("iso"));

        let doc: NewsDocument =
            serde_json::from_str(r#"{"id":"b","date":1500000000000}"#).expect("doc");
        assert_eq!(doc.published, 1_500_000_000_000);
        assert!(doc.title.is_empty());
    }

    #[test]
    fn rejects_unparseable_published_text() {
        let err = serde_json::from_str::<NewsDocument>(r#"{"id":"c","published":"yesterday"}"#)
            .expect_err("bad date");
        assert!(err.to_string().contains("unsupported published value"));
    }

    #[test]
    fn char_length_counts_characters_not_bytes() {
        let doc = NewsDocument {
            id: "x".to_string(),
            title: "Über".to_string(),
            body: "ß".to_string(),
            published: 0,
        };
        assert_eq!(doc.char_length(), 5);
    }

    #[test]
    fn feature_vector_keeps_column_order() {
        let fv = FeatureVector::from_array([1.5, 0.25, 300.0, 1.0]);
        assert_eq!(fv.bm25_score, 1.5);
        assert_eq!(fv.published_after, 1.0);
        assert_eq!(fv.to_array(), [1.5, 0.25, 300.0, 1.0]);
    }

    #[test]
    fn language_names_resolve() {
        assert_eq!(Language::from_name("EN"), Some(Language::English));
        assert_eq!(Language::from_name("deutsch"), Some(Language::German));
        assert_eq!(Language::from_name("fr"), None);
    }

    #[test]
    fn lexical_query_renders_or_clauses() {
        let q = LexicalQuery::any_of(vec!["metro".to_string(), "fare".to_string()]);
        assert_eq!(q.render(), "metro OR fare");
        assert_eq!(q.fields, vec!["title".to_string(), "body".to_string()]);
    }
}
