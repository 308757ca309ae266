//! Sentence-split documents with NER spans and relations (one JSON per line)

use rex_core::{Result, RexError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `[start, end, label]` with an inclusive document-level word span
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NerSpan(pub usize, pub usize, pub String);

impl NerSpan {
    pub fn start(&self) -> usize {
        self.0
    }

    pub fn end(&self) -> usize {
        self.1
    }

    pub fn label(&self) -> &str {
        &self.2
    }

    pub fn span(&self) -> (usize, usize) {
        (self.0, self.1)
    }
}

/// `[sub_start, sub_end, obj_start, obj_end, label]`, inclusive word spans
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationSpan(pub usize, pub usize, pub usize, pub usize, pub String);

impl RelationSpan {
    pub fn subject(&self) -> (usize, usize) {
        (self.0, self.1)
    }

    pub fn object(&self) -> (usize, usize) {
        (self.2, self.3)
    }

    pub fn label(&self) -> &str {
        &self.4
    }
}

/// One document; `ner`, `relations` and `predicted_ner` hold one list per sentence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerDocument {
    pub sentences: Vec<Vec<String>>,
    pub ner: Vec<Vec<NerSpan>>,
    #[serde(default)]
    pub relations: Vec<Vec<RelationSpan>>,
    /// NER output of an upstream model, used for end-to-end evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_ner: Option<Vec<Vec<NerSpan>>>,
}

impl MarkerDocument {
    /// Parse JSON lines, skipping blank lines
    pub fn parse_lines(content: &str) -> Result<Vec<Self>> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(RexError::from))
            .collect()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse_lines(&content)
    }

    pub fn word_count(&self) -> usize {
        self.sentences.iter().map(Vec::len).sum()
    }

    /// Entities offered as subjects and objects: predicted when present, else gold
    pub fn candidate_ner(&self) -> &[Vec<NerSpan>] {
        self.predicted_ner.as_deref().unwrap_or(&self.ner)
    }

    /// Per-sentence lists must line up with the sentences
    pub fn validate(&self, index: usize) -> Result<()> {
        let sentences = self.sentences.len();
        let mut lists = vec![("ner", self.ner.len()), ("relations", self.relations.len())];
        if let Some(predicted) = &self.predicted_ner {
            lists.push(("predicted_ner", predicted.len()));
        }
        for (name, len) in lists {
            if len != sentences {
                return Err(RexError::InvalidDocument(format!(
                    "document {index} has {sentences} sentences but {len} {name} lists"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"{"sentences": [["Alice", "works", "at", "Acme", "."], ["She", "lives", "in", "Paris"]], "ner": [[[0, 0, "PER"], [3, 3, "ORG"]], [[5, 5, "PER"], [8, 8, "LOC"]]], "relations": [[[0, 0, 3, 3, "ORG-AFF"]], []]}"#;

    #[test]
    fn test_parse_document() {
        let docs = MarkerDocument::parse_lines(&format!("{LINE}\n\n{LINE}\n")).unwrap();
        assert_eq!(docs.len(), 2);
        let doc = &docs[0];
        assert_eq!(doc.word_count(), 9);
        assert_eq!(doc.ner[1][1], NerSpan(8, 8, "LOC".to_string()));
        assert_eq!(doc.relations[0][0].object(), (3, 3));
        assert_eq!(doc.relations[0][0].label(), "ORG-AFF");
        assert!(doc.validate(0).is_ok());
        assert_eq!(doc.candidate_ner(), doc.ner.as_slice());
    }

    #[test]
    fn test_predicted_ner_preferred() {
        let mut doc = MarkerDocument::parse_lines(LINE).unwrap().remove(0);
        doc.predicted_ner = Some(vec![vec![], vec![NerSpan(6, 6, "PER".to_string())]]);
        assert_eq!(doc.candidate_ner()[1][0].start(), 6);
        doc.predicted_ner = Some(vec![vec![]]);
        assert!(doc.validate(3).is_err());
    }

    #[test]
    fn test_missing_relations_list() {
        let doc = MarkerDocument {
            sentences: vec![vec!["a".to_string()]],
            ner: vec![vec![]],
            relations: vec![],
            predicted_ner: None,
        };
        assert!(doc.validate(0).is_err());
    }
}
