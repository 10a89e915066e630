//! Character vocabulary.
//!
//! Index 0 is the null/pad symbol; every other character seen in the
//! training transcripts gets the next index in sorted order.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::{NULL_SYMBOL, TEXT_SENTINEL};

use super::text::CharacterSequence;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// `chars[i - 1]` is the character at index `i`.
    chars: Vec<char>,

    #[serde(skip)]
    index: HashMap<char, usize>,
}

impl Vocabulary {
    /// Build from an explicit character list.  Duplicates are dropped.
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let set: BTreeSet<char> = chars.into_iter().collect();
        let mut vocab = Self {
            chars: set.into_iter().collect(),
            index: HashMap::new(),
        };
        vocab.reindex();
        vocab
    }

    /// Collect the character set of a list of transcripts.
    pub fn from_transcripts<S: AsRef<str>>(texts: &[S]) -> Self {
        Self::from_chars(texts.iter().flat_map(|t| t.as_ref().chars().collect::<Vec<_>>()))
    }

    /// Rebuild the reverse index after deserialisation.
    pub fn reindex(&mut self) {
        self.index = self
            .chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i + 1))
            .collect();
    }

    /// Number of symbols including the null symbol.
    pub fn len(&self) -> usize {
        self.chars.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        self.index.contains_key(&c)
    }

    pub fn id(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars()
            .map(|c| match self.id(c) {
                Some(i) => Ok(i),
                None => bail!("character {:?} is not in the vocabulary", c),
            })
            .collect()
    }

    /// Null and unknown indices decode to nothing.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter_map(|&i| if i == 0 { None } else { self.chars.get(i - 1) })
            .collect()
    }

    pub fn symbol(&self, id: usize) -> String {
        if id == 0 {
            NULL_SYMBOL.to_string()
        } else {
            self.chars.get(id - 1).map(|c| c.to_string()).unwrap_or_default()
        }
    }

    /// Encode `text` followed by the end-of-text sentinel.
    pub fn encode_with_sentinel(&self, text: &str) -> Result<CharacterSequence> {
        if text.is_empty() {
            bail!("conditioning text must not be empty");
        }
        let mut ids = self.encode(text)?;
        ids.extend(TEXT_SENTINEL.chars().map(|c| self.id_or_null(c)));
        CharacterSequence::new(ids, self.len())
    }

    /// Encode the text attended over after priming:
    /// `reference + " " + text` followed by the sentinel.
    pub fn encode_primed(&self, reference: &str, text: &str) -> Result<CharacterSequence> {
        let reference = self.encode_plain(reference)?;
        let separator = CharacterSequence::new(vec![self.id_or_null(' ')], self.len())?;
        reference
            .concat(&separator)?
            .concat(&self.encode_with_sentinel(text)?)
    }

    /// Index of a structural blank, or the null symbol when the vocabulary
    /// has none.
    fn id_or_null(&self, c: char) -> usize {
        self.id(c).unwrap_or_else(|| {
            tracing::warn!("character {:?} missing from vocabulary, padding with null", c);
            0
        })
    }

    /// Encode a transcript without the sentinel, as used for priming.
    pub fn encode_plain(&self, text: &str) -> Result<CharacterSequence> {
        if text.is_empty() {
            bail!("transcript must not be empty");
        }
        CharacterSequence::new(self.encode(text)?, self.len())
    }
}
