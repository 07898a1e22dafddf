//! Word-level phrase matching shared by the quality and alignment scorers

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Lowercased Unicode words of `text`
pub fn words(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Tokenized text that answers "does this phrase occur?"
#[derive(Debug, Clone)]
pub struct TextIndex {
    words: Vec<String>,
    vocabulary: HashSet<String>,
}

impl TextIndex {
    pub fn new(text: &str) -> Self {
        let words = words(text);
        let vocabulary = words.iter().cloned().collect();
        Self { words, vocabulary }
    }

    /// True when every word of `phrase` appears contiguously, in order
    pub fn contains_phrase(&self, phrase: &str) -> bool {
        let needle = words(phrase);
        match needle.len() {
            0 => false,
            1 => self.vocabulary.contains(&needle[0]),
            n => self.words.windows(n).any(|window| window == needle.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_word_matching() {
        let index = TextIndex::new("She said: Neural-network agents, and machine learning!");
        assert!(index.contains_phrase("neural"));
        assert!(index.contains_phrase("Machine Learning"));
        assert!(index.contains_phrase("neural network"));
        assert!(!index.contains_phrase("ai"));
        assert!(!index.contains_phrase("learning machine"));
        assert!(!index.contains_phrase("   "));
    }
}
