//! Built-in reference stages.
//!
//! Small and deliberately naive; they exist so a pipeline can run end to end
//! without external models.

use std::collections::BTreeSet;
use std::sync::Arc;

use annota_core::{keys, tags, Annotator, Document, Properties, Sentence, SignatureKey, StageError, Tag, Token};

use crate::registry::StageFactory;

const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '"', '(', ')'];
const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Factories for every reference stage.
pub fn reference_factories() -> Vec<StageFactory> {
    vec![
        StageFactory::new(
            "tokenize",
            vec![
                SignatureKey::exact("tokenize.whitespace"),
                SignatureKey::exact("tokenize.lowercase"),
            ],
            |props| Ok(Arc::new(Tokenizer::from_properties(props)) as Arc<dyn Annotator>),
        ),
        StageFactory::new(
            "ssplit",
            vec![SignatureKey::exact("ssplit.eolonly")],
            |props| Ok(Arc::new(SentenceSplitter::from_properties(props)) as Arc<dyn Annotator>),
        ),
    ]
}

// ── tokenize ──────────────────────────────────────────────────

/// Splits text on whitespace, and by default also splits punctuation into
/// tokens of its own. Offsets are character positions in the text.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    /// `tokenize.whitespace=true` disables punctuation splitting.
    whitespace_only: bool,
    lowercase: bool,
}

impl Tokenizer {
    pub fn from_properties(props: &Properties) -> Self {
        Self {
            whitespace_only: props.get_bool("tokenize.whitespace", false),
            lowercase: props.get_bool("tokenize.lowercase", false),
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut start = 0;

        for (i, c) in text.chars().enumerate() {
            if c.is_whitespace() {
                self.flush(&mut tokens, &mut current, start);
            } else if !self.whitespace_only && PUNCTUATION.contains(&c) {
                self.flush(&mut tokens, &mut current, start);
                tokens.push(Token {
                    word: c.to_string(),
                    begin: i,
                    end: i + 1,
                });
            } else {
                if current.is_empty() {
                    start = i;
                }
                current.push(c);
            }
        }
        self.flush(&mut tokens, &mut current, start);
        tokens
    }

    fn flush(&self, tokens: &mut Vec<Token>, current: &mut String, start: usize) {
        if current.is_empty() {
            return;
        }
        let len = current.chars().count();
        let word = if self.lowercase {
            current.to_lowercase()
        } else {
            current.clone()
        };
        tokens.push(Token {
            word,
            begin: start,
            end: start + len,
        });
        current.clear();
    }
}

impl Annotator for Tokenizer {
    fn requires(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }

    fn requirements_satisfied(&self) -> BTreeSet<Tag> {
        BTreeSet::from([tags::TOKENS])
    }

    fn apply(&self, document: &mut Document) -> Result<(), StageError> {
        let text = document.require(&keys::TEXT)?;
        let tokens = self.tokenize(&text);
        document.set(&keys::TOKENS, tokens)
    }
}

// ── ssplit ────────────────────────────────────────────────────

/// Groups tokens into sentences.
///
/// A sentence ends after a token ending in `.`, `!` or `?`, or, with
/// `ssplit.eolonly=true`, only where a newline separates two tokens.
#[derive(Debug, Clone, Default)]
pub struct SentenceSplitter {
    eol_only: bool,
}

impl SentenceSplitter {
    pub fn from_properties(props: &Properties) -> Self {
        Self {
            eol_only: props.get_bool("ssplit.eolonly", false),
        }
    }

    pub fn split(&self, text: &str, tokens: &[Token]) -> Vec<Sentence> {
        let chars: Vec<char> = if self.eol_only {
            text.chars().collect()
        } else {
            Vec::new()
        };

        let mut sentences = Vec::new();
        let mut begin = 0;
        for (i, token) in tokens.iter().enumerate() {
            let boundary = if self.eol_only {
                tokens.get(i + 1).is_some_and(|next| {
                    chars
                        .get(token.end..next.begin)
                        .is_some_and(|gap| gap.contains(&'\n'))
                })
            } else {
                token.word.ends_with(TERMINATORS)
            };
            if boundary {
                sentences.push(Sentence {
                    token_begin: begin,
                    token_end: i + 1,
                });
                begin = i + 1;
            }
        }
        if begin < tokens.len() {
            sentences.push(Sentence {
                token_begin: begin,
                token_end: tokens.len(),
            });
        }
        sentences
    }
}

impl Annotator for SentenceSplitter {
    fn requires(&self) -> BTreeSet<Tag> {
        BTreeSet::from([tags::TOKENS])
    }

    fn requirements_satisfied(&self) -> BTreeSet<Tag> {
        BTreeSet::from([tags::SENTENCES])
    }

    fn apply(&self, document: &mut Document) -> Result<(), StageError> {
        let tokens = document.require(&keys::TOKENS)?;
        let sentences = self.split(document.text(), &tokens);
        document.set(&keys::SENTENCES, sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.word.as_str()).collect()
    }

    #[test]
    fn splits_punctuation_by_default() {
        let tokens = Tokenizer::default().tokenize("Hello, world!");
        assert_eq!(words(&tokens), vec!["Hello", ",", "world", "!"]);
        assert_eq!((tokens[0].begin, tokens[0].end), (0, 5));
        assert_eq!((tokens[1].begin, tokens[1].end), (5, 6));
        assert_eq!((tokens[2].begin, tokens[2].end), (7, 12));
        assert_eq!((tokens[3].begin, tokens[3].end), (12, 13));
    }

    #[test]
    fn whitespace_mode_keeps_punctuation_attached() {
        let props = Properties::new().with("tokenize.whitespace", "true");
        let tokens = Tokenizer::from_properties(&props).tokenize("Hello, world!");
        assert_eq!(words(&tokens), vec!["Hello,", "world!"]);
    }

    #[test]
    fn offsets_count_characters() {
        let tokens = Tokenizer::default().tokenize("héllo wörld");
        assert_eq!((tokens[1].begin, tokens[1].end), (6, 11));
    }

    #[test]
    fn lowercase_option() {
        let props = Properties::new().with("tokenize.lowercase", "true");
        let tokens = Tokenizer::from_properties(&props).tokenize("The CAT");
        assert_eq!(words(&tokens), vec!["the", "cat"]);
    }

    #[test]
    fn splits_sentences_on_terminators() {
        let text = "It rains. Does it? Yes";
        let tokens = Tokenizer::default().tokenize(text);
        let sentences = SentenceSplitter::default().split(text, &tokens);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], Sentence { token_begin: 0, token_end: 3 });
        assert_eq!(sentences[1], Sentence { token_begin: 3, token_end: 6 });
        assert_eq!(sentences[2], Sentence { token_begin: 6, token_end: 7 });
    }

    #[test]
    fn eol_only_ignores_terminators() {
        let text = "One. Two.\nThree";
        let tokens = Tokenizer::default().tokenize(text);
        let splitter = SentenceSplitter::from_properties(&Properties::new().with("ssplit.eolonly", "true"));
        let sentences = splitter.split(text, &tokens);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].len(), 4);
        assert_eq!(sentences[1].len(), 1);
    }

    #[test]
    fn annotate_document_end_to_end() {
        let mut doc = Document::new("A b. C d.");
        Tokenizer::default().apply(&mut doc).unwrap();
        SentenceSplitter::default().apply(&mut doc).unwrap();
        assert_eq!(doc.require(&keys::TOKENS).unwrap().len(), 6);
        assert_eq!(doc.require(&keys::SENTENCES).unwrap().len(), 2);
    }

    #[test]
    fn ssplit_without_tokens_fails() {
        let mut doc = Document::new("no tokens yet");
        let err = SentenceSplitter::default().apply(&mut doc).unwrap_err();
        assert!(matches!(err, StageError::MissingAnnotation(t) if t == tags::TOKENS));
    }
}
