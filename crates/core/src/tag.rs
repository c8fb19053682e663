//! Capability tags and typed document keys.
//!
//! A [`Tag`] names one kind of annotation data. Stages declare the tags they
//! require and the tags they provide; documents store their payloads under
//! the tag name. A [`Key`] pairs a tag with the Rust type stored under it so
//! reads and writes stay typed.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Identifies one kind of annotation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tag(&'static str);

impl Tag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A typed handle for a document field.
///
/// `T` is the payload type stored under [`Key::tag`].
pub struct Key<T> {
    tag: Tag,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            tag: Tag::new(name),
            _marker: PhantomData,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.tag)
    }
}

// ── Standard payloads ─────────────────────────────────────────

/// One token with its character offsets into the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub word: String,
    pub begin: usize,
    pub end: usize,
}

/// A sentence as a half-open range of token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub token_begin: usize,
    pub token_end: usize,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.token_end - self.token_begin
    }

    pub fn is_empty(&self) -> bool {
        self.token_begin == self.token_end
    }
}

// ── Standard tags ─────────────────────────────────────────────

pub mod tags {
    use super::Tag;

    pub const TEXT: Tag = Tag::new("text");
    pub const TOKENS: Tag = Tag::new("tokens");
    pub const SENTENCES: Tag = Tag::new("sentences");
    pub const CLEAN_XML: Tag = Tag::new("clean_xml");
    pub const DOC_DATE: Tag = Tag::new("docdate");
    pub const POS: Tag = Tag::new("pos");
    pub const LEMMA: Tag = Tag::new("lemma");
    pub const NER: Tag = Tag::new("ner");
    pub const REGEXNER: Tag = Tag::new("regexner");
    pub const TRUECASE: Tag = Tag::new("truecase");
    pub const PARSE: Tag = Tag::new("parse");
    pub const DEPENDENCIES: Tag = Tag::new("dependencies");
    pub const GENDER: Tag = Tag::new("gender");
    pub const SENTIMENT: Tag = Tag::new("sentiment");
    pub const ENTITY_MENTIONS: Tag = Tag::new("entity_mentions");
    pub const MENTIONS: Tag = Tag::new("mentions");
    pub const COREF: Tag = Tag::new("coref");
    pub const NATLOG: Tag = Tag::new("natlog");
    pub const OPENIE: Tag = Tag::new("openie");
    pub const RELATIONS: Tag = Tag::new("relations");
    pub const QUOTES: Tag = Tag::new("quotes");
}

pub mod keys {
    use super::{Key, Sentence, Token};

    pub const TEXT: Key<String> = Key::new("text");
    pub const TOKENS: Key<Vec<Token>> = Key::new("tokens");
    pub const SENTENCES: Key<Vec<Sentence>> = Key::new("sentences");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_tag_share_a_name() {
        assert_eq!(keys::TOKENS.tag(), tags::TOKENS);
        assert_eq!(keys::TEXT.tag().to_string(), "text");
    }

    #[test]
    fn tags_order_by_name() {
        assert!(tags::LEMMA < tags::POS);
    }
}
