use indexmap::IndexMap;

use crate::error::{CtcError, Result};

// Converter maps text to label sequences and back. Classes are numbered in
// lexicon order, the blank comes last.
#[derive(Debug, Clone)]
pub struct Converter {
    pub lexicon: IndexMap<char, usize>,
}

impl Converter {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        let mut lexicon = IndexMap::with_capacity(raw.len());

        for ch in raw.chars().filter(|ch| !ch.is_control()) {
            let next = lexicon.len();
            lexicon.entry(ch).or_insert(next);
        }

        Converter { lexicon }
    }

    /// Depth of the score matrices this lexicon expects, blank included.
    pub fn num_classes(&self) -> usize {
        self.lexicon.len() + 1
    }

    pub fn blank(&self) -> usize {
        self.lexicon.len()
    }

    pub fn encode_single<S: AsRef<str>>(&self, text: S) -> Result<Vec<i32>> {
        text.as_ref()
            .chars()
            .map(|ch| {
                self.lexicon.get(&ch).map(|&idx| idx as i32).ok_or_else(|| {
                    CtcError::invalid_argument(format!("character {ch:?} is not in the lexicon"))
                })
            })
            .collect()
    }

    pub fn encode_multi<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<i32>>> {
        texts.iter().map(|text| self.encode_single(text)).collect()
    }

    /// Text of a label sequence. With `raw`, blanks are shown as `-` and
    /// nothing is merged; otherwise repeats are merged and blanks dropped,
    /// the way a best path is read.
    pub fn decode(&self, encoded: &[usize], raw: bool) -> String {
        let mut decoded_text = String::with_capacity(encoded.len());
        for (idx, &ch_encoded) in encoded.iter().enumerate() {
            let is_blank = ch_encoded >= self.blank();
            if raw {
                match self.lexicon.get_index(ch_encoded) {
                    Some((&ch, _)) if !is_blank => decoded_text.push(ch),
                    _ => decoded_text.push('-'),
                }
            } else if !is_blank && !(idx > 0 && encoded[idx - 1] == ch_encoded) {
                if let Some((&ch, _)) = self.lexicon.get_index(ch_encoded) {
                    decoded_text.push(ch);
                }
            }
        }

        decoded_text
    }

    /// Collapsed text of every sequence, as `decode(_, false)` reads it.
    pub fn decode_multi(&self, encoded_texts: &[Vec<usize>]) -> Vec<String> {
        encoded_texts
            .iter()
            .map(|encoded| self.decode(encoded, false))
            .collect()
    }
}
