use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::tag::{keys, Key, Tag};

/// The unit of work: a typed key-value store shared by every stage of one run.
///
/// Fields are stored as JSON values under their tag name so a document can
/// cross a process boundary unchanged. Stages add or overwrite the fields
/// they own; there is no way to remove one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, serde_json::Value>,
}

impl Document {
    /// Create a document holding the raw text to annotate.
    pub fn new(text: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            keys::TEXT.tag().name().to_string(),
            serde_json::Value::String(text.into()),
        );
        Self { fields }
    }

    /// The original text, or an empty string for a document built without one.
    pub fn text(&self) -> &str {
        self.fields
            .get(keys::TEXT.tag().name())
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    /// Store a typed payload, replacing any previous value under the same tag.
    pub fn set<T: Serialize>(&mut self, key: &Key<T>, value: T) -> Result<(), StageError> {
        let tag = key.tag();
        let value = serde_json::to_value(value).map_err(|e| StageError::Encode {
            tag: tag.to_string(),
            message: e.to_string(),
        })?;
        self.fields.insert(tag.name().to_string(), value);
        Ok(())
    }

    /// Read a typed payload. `Ok(None)` when the tag is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<Option<T>, StageError> {
        let tag = key.tag();
        match self.fields.get(tag.name()) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StageError::Decode {
                    tag: tag.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Read a typed payload that an earlier stage must have produced.
    pub fn require<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<T, StageError> {
        self.get(key)?
            .ok_or(StageError::MissingAnnotation(key.tag()))
    }

    /// Store an untyped value under a raw tag name.
    pub fn set_raw(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn get_raw(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.fields.contains_key(tag.name())
    }

    /// Field names currently present, in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Copy every field of `other` over this document.
    ///
    /// Used when an annotated copy comes back from a remote worker and must
    /// be folded into the caller's document.
    pub fn merge_from(&mut self, other: Document) {
        self.fields.extend(other.fields);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
