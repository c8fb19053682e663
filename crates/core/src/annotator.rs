use std::collections::BTreeSet;

use serde::Serialize;

use crate::document::Document;
use crate::error::StageError;
use crate::tag::Tag;

/// One processing stage of an annotation pipeline.
///
/// Instances are built once per configuration and shared by every pipeline
/// and every concurrent run that uses them, so `apply` must not rely on
/// per-call mutable state held in `self`.
pub trait Annotator: Send + Sync {
    /// Tags that must already be present on the document.
    fn requires(&self) -> BTreeSet<Tag>;

    /// Tags this stage adds to the document.
    fn requirements_satisfied(&self) -> BTreeSet<Tag>;

    /// Annotate `document` in place.
    fn apply(&self, document: &mut Document) -> Result<(), StageError>;
}

/// Static description of a stage: its name and declared capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub name: String,
    pub requires: BTreeSet<Tag>,
    pub provides: BTreeSet<Tag>,
}

impl StageDescriptor {
    pub fn of(name: impl Into<String>, annotator: &dyn Annotator) -> Self {
        Self {
            name: name.into(),
            requires: annotator.requires(),
            provides: annotator.requirements_satisfied(),
        }
    }
}
