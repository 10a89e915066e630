//! Encoded conditioning text.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Vocabulary indices of a text plus a mask of valid (non-padding) positions.
///
/// Immutable once built.  Padding is always a suffix: the valid positions are
/// `0..valid_len()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterSequence {
    indices: Vec<usize>,
    valid_len: usize,
    vocab_size: usize,
}

impl CharacterSequence {
    /// A fully valid sequence.
    pub fn new(indices: Vec<usize>, vocab_size: usize) -> Result<Self> {
        let valid_len = indices.len();
        Self::padded(indices, valid_len, vocab_size)
    }

    /// A sequence whose positions from `valid_len` on are padding.
    pub fn padded(indices: Vec<usize>, valid_len: usize, vocab_size: usize) -> Result<Self> {
        if indices.is_empty() || valid_len == 0 {
            bail!("character sequence must contain at least one valid position");
        }
        if valid_len > indices.len() {
            bail!(
                "valid length {} exceeds sequence length {}",
                valid_len,
                indices.len()
            );
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= vocab_size) {
            bail!("character index {} out of range (vocab size {})", bad, vocab_size);
        }
        Ok(Self {
            indices,
            valid_len,
            vocab_size,
        })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Total length including padding.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn mask(&self) -> Vec<f32> {
        (0..self.indices.len())
            .map(|u| if u < self.valid_len { 1.0 } else { 0.0 })
            .collect()
    }

    /// Valid positions of `self` followed by those of `other`.
    pub fn concat(&self, other: &CharacterSequence) -> Result<Self> {
        if self.vocab_size != other.vocab_size {
            bail!(
                "cannot join sequences over vocabularies of size {} and {}",
                self.vocab_size,
                other.vocab_size
            );
        }
        let mut indices = self.indices[..self.valid_len].to_vec();
        indices.extend_from_slice(&other.indices[..other.valid_len]);
        Self::new(indices, self.vocab_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        assert!(CharacterSequence::new(vec![], 5).is_err());
        assert!(CharacterSequence::padded(vec![1, 0], 0, 5).is_err());
    }

    #[test]
    fn test_rejects_out_of_vocab() {
        let err = CharacterSequence::new(vec![1, 9], 5).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_padded_mask() {
        let seq = CharacterSequence::padded(vec![3, 2, 0, 0], 2, 5).unwrap();
        assert_eq!(seq.valid_len(), 2);
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.mask(), vec![1.0, 1.0, 0.0, 0.0]);
        assert!(CharacterSequence::padded(vec![1, 2], 3, 5).is_err());
    }

    #[test]
    fn test_concat_drops_padding() {
        let a = CharacterSequence::padded(vec![1, 2, 0], 2, 5).unwrap();
        let b = CharacterSequence::new(vec![3, 4], 5).unwrap();
        let joined = a.concat(&b).unwrap();
        assert_eq!(joined.indices(), &[1, 2, 3, 4]);
        assert_eq!(joined.valid_len(), 4);
        let other_vocab = CharacterSequence::new(vec![1], 7).unwrap();
        assert!(a.concat(&other_vocab).is_err());
    }
}
