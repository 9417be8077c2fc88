use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::JsonLines;

/// Graded relevance annotations for one query document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judgement {
    pub id: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
    #[serde(
        rename = "exp_rel",
        serialize_with = "serialize_grade",
        deserialize_with = "deserialize_grade"
    )]
    pub grade: u32,
}

impl Judgement {
    /// References graded at or above `cutoff`.
    pub fn relevant(&self, cutoff: u32) -> Vec<&Reference> {
        self.references
            .iter()
            .filter(|reference| reference.grade >= cutoff)
            .collect()
    }
}

fn serialize_grade<S: Serializer>(grade: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&grade.to_string())
}

fn deserialize_grade<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawGrade {
        Int(u32),
        Text(String),
    }

    match RawGrade::deserialize(deserializer)? {
        RawGrade::Int(v) => Ok(v),
        RawGrade::Text(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| serde::de::Error::custom(format!("invalid relevance grade: {raw}"))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct JudgementList {
    pub judgements: Vec<Judgement>,
    pub skipped_lines: usize,
}

/// Reads every judgement from the given JSON lines files, in order.
/// Malformed lines are logged and counted instead of aborting the load.
pub fn load_judgements<P: AsRef<Path>>(paths: &[P]) -> Result<JudgementList> {
    let mut out = JudgementList::default();
    for path in paths {
        let path = path.as_ref();
        for (line_no, parsed) in JsonLines::<Judgement>::open(path)? {
            match parsed {
                Ok(judgement) => out.judgements.push(judgement),
                Err(err) => {
                    tracing::warn!(
                        file = %path.display(),
                        line = line_no,
                        error = %err,
                        "skipping malformed judgement"
                    );
                    out.skipped_lines += 1;
                }
            }
        }
    }
    Ok(out)
}
