use std::{fmt, str::FromStr};

use common::{EngineError, NewsDocument, Result};
use serde::{Deserialize, Serialize};

use crate::keywords::KeywordExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingSource {
    Title,
    TitleWithFirstParagraph,
    #[default]
    Keywords,
}

impl EmbeddingSource {
    pub const ALL: [Self; 3] = [Self::Title, Self::TitleWithFirstParagraph, Self::Keywords];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::TitleWithFirstParagraph => "title-with-first-paragraph",
            Self::Keywords => "keywords",
        }
    }

    pub fn text_for(self, doc: &NewsDocument, keywords: &KeywordExtractor) -> Result<Option<String>> {
        let text = match self {
            Self::Title => doc.title.trim().to_string(),
            Self::TitleWithFirstParagraph => {
                format!("{} {}", doc.title.trim(), first_paragraph(&doc.body))
                    .trim()
                    .to_string()
            }
            Self::Keywords => return keywords.keyword_query_text(doc),
        };
        Ok((!text.is_empty()).then_some(text))
    }
}

impl fmt::Display for EmbeddingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingSource {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.name().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "unknown embedding source `{raw}`, expected one of: title, title-with-first-paragraph, keywords"
                ))
            })
    }
}

pub fn first_paragraph(body: &str) -> &str {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
}
