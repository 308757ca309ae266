//! Immutable label vocabularies
//!
//! Vocabularies are loaded once from JSON and shared read-only behind an
//! `Arc` by every model that needs type or relation ids.

use crate::{RexError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| RexError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Flat `name -> id` vocabulary (entity types, GLRE relations)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    name_to_id: HashMap<String, usize>,
    id_to_name: HashMap<usize, String>,
}

impl Vocabulary {
    /// Build from names in id order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .enumerate()
            .map(|(id, name)| (name.into(), id))
            .collect::<HashMap<_, _>>()
            .try_into()
            .unwrap_or_default()
    }

    /// Parse a flat JSON object such as `{"NA": 0, "P17": 1}`
    pub fn from_json(content: &str) -> Result<Self> {
        let map: HashMap<String, usize> = serde_json::from_str(content)?;
        map.try_into()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let map: HashMap<String, usize> = read_json(path.as_ref())?;
        map.try_into()
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.name_to_id.get(name).copied()
    }

    /// Like [`Vocabulary::id`] but reports the missing name
    pub fn require(&self, name: &str) -> Result<usize> {
        self.id(name)
            .ok_or_else(|| RexError::Vocabulary(format!("unknown label '{name}'")))
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    /// Names sorted by id
    pub fn names(&self) -> Vec<&str> {
        let mut entries: Vec<(&usize, &String)> = self.id_to_name.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, name)| name.as_str()).collect()
    }
}

impl TryFrom<HashMap<String, usize>> for Vocabulary {
    type Error = RexError;

    fn try_from(name_to_id: HashMap<String, usize>) -> Result<Self> {
        let mut id_to_name = HashMap::with_capacity(name_to_id.len());
        for (name, id) in &name_to_id {
            if let Some(other) = id_to_name.insert(*id, name.clone()) {
                return Err(RexError::Vocabulary(format!(
                    "id {id} is shared by '{other}' and '{name}'"
                )));
            }
        }
        Ok(Self {
            name_to_id,
            id_to_name,
        })
    }
}

/// OneRel relation file: `[{"0": "rel", ...}, {"rel": 0, ...}]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OneRelRelations(HashMap<String, String>, HashMap<String, usize>);

impl OneRelRelations {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut id2rel = HashMap::new();
        let mut rel2id = HashMap::new();
        for (id, name) in names.into_iter().enumerate() {
            let name = name.into();
            id2rel.insert(id.to_string(), name.clone());
            rel2id.insert(name, id);
        }
        Self(id2rel, rel2id)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let relations: Self = read_json(path.as_ref())?;
        relations.check()?;
        Ok(relations)
    }

    fn check(&self) -> Result<()> {
        if self.0.len() != self.1.len() {
            return Err(RexError::Vocabulary(format!(
                "id2rel has {} entries but rel2id has {}",
                self.0.len(),
                self.1.len()
            )));
        }
        for (name, id) in &self.1 {
            if self.relation(*id) != Some(name.as_str()) {
                return Err(RexError::Vocabulary(format!(
                    "relation '{name}' maps to {id} but id2rel disagrees"
                )));
            }
        }
        Ok(())
    }

    /// Relation name for a tag-cube channel
    pub fn relation(&self, id: usize) -> Option<&str> {
        self.0.get(&id.to_string()).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.1.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.1.is_empty()
    }
}

/// Raw PLMarker relation file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationSchemaFile {
    pub relation: Vec<String>,
    #[serde(default)]
    pub sym: Vec<String>,
    #[serde(default)]
    pub no_sym: Vec<String>,
}

/// PLMarker relation labels with symmetric-label handling
///
/// The first entry of the symmetric list is a placeholder and never counts
/// as symmetric; only the rest of the list does.
#[derive(Debug, Clone)]
pub struct MarkerRelationSchema {
    relations: Vec<String>,
    index: HashMap<String, usize>,
    sym_labels: Vec<String>,
}

impl MarkerRelationSchema {
    /// `no_sym` restricts the symmetric labels to the `no_sym` list
    pub fn new(file: RelationSchemaFile, no_sym: bool) -> Self {
        let mut sym_labels = file.no_sym;
        if !no_sym {
            sym_labels.extend(file.sym);
        }
        let index = file
            .relation
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self {
            relations: file.relation,
            index,
            sym_labels,
        }
    }

    pub fn from_file(path: impl AsRef<Path>, no_sym: bool) -> Result<Self> {
        Ok(Self::new(read_json(path.as_ref())?, no_sym))
    }

    pub fn label_id(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| RexError::Vocabulary(format!("unknown relation '{label}'")))
    }

    pub fn is_symmetric(&self, label: &str) -> bool {
        self.sym_labels.iter().skip(1).any(|s| s == label)
    }

    /// Label id for the object→subject direction of a gold relation
    pub fn reverse_label_id(&self, label: &str) -> Result<usize> {
        let id = self.label_id(label)?;
        if self.is_symmetric(label) {
            Ok(id)
        } else {
            Ok((id + self.relations.len()).saturating_sub(self.sym_labels.len()))
        }
    }

    /// Size of the classifier output including reverse-direction labels
    pub fn label_count(&self) -> usize {
        (2 * self.relations.len()).saturating_sub(self.sym_labels.len())
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn sym_labels(&self) -> &[String] {
        &self.sym_labels
    }
}

/// Entity-type and relation vocabularies of a dataset directory
#[derive(Debug, Clone)]
pub struct Vocabularies {
    pub types: Arc<Vocabulary>,
    pub relations: Arc<Vocabulary>,
}

impl Vocabularies {
    /// Load `ner2id.json` and `rel2id.json` from `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            types: Arc::new(Vocabulary::from_file(dir.join("ner2id.json"))?),
            relations: Arc::new(Vocabulary::from_file(dir.join("rel2id.json"))?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_vocabulary() {
        let vocab = Vocabulary::from_json(r#"{"NA": 0, "P17": 1, "P131": 2}"#).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.id("P17"), Some(1));
        assert_eq!(vocab.name(2), Some("P131"));
        assert_eq!(vocab.names(), vec!["NA", "P17", "P131"]);
        assert!(vocab.require("P6").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(Vocabulary::from_json(r#"{"a": 0, "b": 0}"#).is_err());
    }

    #[test]
    fn test_from_names() {
        let vocab = Vocabulary::from_names(["Chemical", "Disease"]);
        assert_eq!(vocab.id("Disease"), Some(1));
    }

    #[test]
    fn test_onerel_relations() {
        let json = r#"[{"0": "/people/person/place_lived", "1": "/location/contains"},
                       {"/people/person/place_lived": 0, "/location/contains": 1}]"#;
        let relations: OneRelRelations = serde_json::from_str(json).unwrap();
        relations.check().unwrap();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations.relation(1), Some("/location/contains"));
        assert_eq!(relations.id("/people/person/place_lived"), Some(0));
    }

    #[test]
    fn test_onerel_relations_disagree() {
        let json = r#"[{"0": "a", "1": "b"}, {"a": 1, "b": 0}]"#;
        let relations: OneRelRelations = serde_json::from_str(json).unwrap();
        assert!(relations.check().is_err());
    }

    fn schema_file() -> RelationSchemaFile {
        RelationSchemaFile {
            relation: vec![
                "no_relation".into(),
                "PART-WHOLE".into(),
                "PER-SOC".into(),
                "ORG-AFF".into(),
            ],
            sym: vec!["PER-SOC".into()],
            no_sym: vec!["no_relation".into()],
        }
    }

    #[test]
    fn test_marker_schema_symmetric() {
        let schema = MarkerRelationSchema::new(schema_file(), false);
        assert_eq!(schema.sym_labels().len(), 2);
        assert!(schema.is_symmetric("PER-SOC"));
        // the first entry is a placeholder
        assert!(!schema.is_symmetric("no_relation"));
        assert_eq!(schema.reverse_label_id("PER-SOC").unwrap(), 2);
        // 1 + 4 - 2
        assert_eq!(schema.reverse_label_id("PART-WHOLE").unwrap(), 3);
        assert_eq!(schema.label_count(), 6);
    }

    #[test]
    fn test_marker_schema_no_sym_flag() {
        let schema = MarkerRelationSchema::new(schema_file(), true);
        assert!(!schema.is_symmetric("PER-SOC"));
        assert_eq!(schema.reverse_label_id("ORG-AFF").unwrap(), 6);
        assert_eq!(schema.label_count(), 7);
    }

    #[test]
    fn test_load_vocabularies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ner2id.json"), r#"{"PER": 0, "ORG": 1}"#).unwrap();
        std::fs::write(dir.path().join("rel2id.json"), r#"{"NA": 0}"#).unwrap();

        let vocabs = Vocabularies::load(dir.path()).unwrap();
        assert_eq!(vocabs.types.len(), 2);
        assert_eq!(vocabs.relations.id("NA"), Some(0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Vocabularies::load(dir.path()),
            Err(RexError::Io { .. })
        ));
    }
}
