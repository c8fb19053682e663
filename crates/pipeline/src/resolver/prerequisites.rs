use indexmap::IndexMap;

/// Built-in stage names and the stages each one needs to have run first.
const STANDARD: &[(&str, &[&str])] = &[
    ("tokenize", &[]),
    ("cdc_tokenize", &[]),
    ("clean", &[]),
    ("docdate", &[]),
    ("ssplit", &["tokenize"]),
    ("pos", &["tokenize", "ssplit"]),
    ("lemma", &["tokenize", "ssplit", "pos"]),
    ("ner", &["tokenize", "ssplit", "pos", "lemma"]),
    ("regexner", &["tokenize", "ssplit"]),
    ("tokensregex", &["tokenize", "ssplit"]),
    ("entitymentions", &["tokenize", "ssplit", "pos", "lemma", "ner"]),
    ("truecase", &["tokenize", "ssplit", "pos", "lemma"]),
    ("parse", &["tokenize", "ssplit"]),
    ("depparse", &["tokenize", "ssplit", "pos"]),
    ("gender", &["tokenize", "ssplit", "pos"]),
    ("sentiment", &["tokenize", "ssplit", "pos", "parse"]),
    ("natlog", &["tokenize", "ssplit", "pos", "lemma", "depparse"]),
    ("openie", &["tokenize", "ssplit", "pos", "lemma", "depparse", "natlog"]),
    ("mention", &["tokenize", "ssplit", "pos", "lemma", "ner", "depparse"]),
    ("coref", &["tokenize", "ssplit", "pos", "lemma", "ner", "mention"]),
    ("dcoref", &["tokenize", "ssplit", "pos", "lemma", "ner", "parse"]),
    ("relation", &["tokenize", "ssplit", "pos", "lemma", "ner", "depparse"]),
    ("kbp", &["tokenize", "ssplit", "pos", "lemma", "ner", "coref"]),
    ("entitylink", &["tokenize", "ssplit", "pos", "lemma", "ner", "entitymentions"]),
    ("quote", &["tokenize", "ssplit", "pos", "lemma", "ner", "coref"]),
    ("udfeats", &["tokenize", "ssplit", "pos", "depparse"]),
];

/// Stage name -> names of the stages that must run before it.
///
/// Insertion order is preserved so iteration, and therefore resolution,
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerequisiteMap {
    entries: IndexMap<String, Vec<String>>,
}

impl PrerequisiteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table of stage prerequisites.
    pub fn standard() -> Self {
        let mut map = Self::new();
        for (name, prereqs) in STANDARD {
            map.insert(*name, prereqs.iter().copied());
        }
        map
    }

    /// Add or replace the prerequisites of `name`.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, prerequisites: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.insert(
            name.into(),
            prerequisites.into_iter().map(Into::into).collect(),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn prerequisites_of(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(|v| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, I, S> FromIterator<(N, I)> for PrerequisiteMap
where
    N: Into<String>,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, prereqs) in iter {
            map.insert(name, prereqs);
        }
        map
    }
}
