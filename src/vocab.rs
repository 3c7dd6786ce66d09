//! Vocabulary and tokenizer.
//!
//! The vocabulary maps token ids to their text fragments and back.
//! Tokenization runs in two stages:
//!
//! 1. Split the input into words with a character-class state machine
//!    (contraction suffixes, letter runs, digit runs, punctuation runs,
//!    whitespace handling).
//! 2. Encode each word greedily, always taking the longest prefix that
//!    exists in the vocabulary.

use std::collections::HashMap;

use log::{debug, warn};

/// Token identifier. Valid ids are below the vocabulary size.
pub type TokenId = u32;

/// GPT-2 end-of-text id, used when the vocabulary lacks the marker entry.
const GPT2_END_OF_TEXT: TokenId = 50256;

/// The text form of the end-of-text marker.
const END_OF_TEXT_TOKEN: &str = "<|endoftext|>";

/// Token id <-> text mapping with tokenization.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, TokenId>,
    end_of_text: TokenId,
}

impl Vocabulary {
    /// Builds a vocabulary from raw token byte strings, in id order.
    ///
    /// Entries that are not valid UTF-8 are replaced with U+FFFD so the
    /// rest of the engine can work with `&str`.
    pub fn from_entries(entries: Vec<Vec<u8>>) -> Self {
        let mut id_to_token = Vec::with_capacity(entries.len());
        let mut token_to_id = HashMap::with_capacity(entries.len());

        for (id, bytes) in entries.into_iter().enumerate() {
            let token = match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => {
                    debug!("token {id} is not valid utf-8, substituting");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            token_to_id.insert(token.clone(), id as TokenId);
            id_to_token.push(token);
        }

        let end_of_text = token_to_id
            .get(END_OF_TEXT_TOKEN)
            .copied()
            .unwrap_or(GPT2_END_OF_TEXT);

        Self {
            id_to_token,
            token_to_id,
            end_of_text,
        }
    }

    /// Number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    /// Returns true if the vocabulary has no entries.
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// The id that terminates generation.
    pub fn end_of_text_id(&self) -> TokenId {
        self.end_of_text
    }

    /// Text fragment for a token id, if the id is in range.
    pub fn decode(&self, id: TokenId) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    /// Id for an exact token string, if present.
    pub fn token_id(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    /// Tokenizes text into ids.
    ///
    /// Each word from [`split_words`] is matched greedily: the longest
    /// vocabulary entry starting at the current position wins. A single
    /// character with no vocabulary entry is skipped with a diagnostic.
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        let mut ids = Vec::new();
        for word in split_words(text) {
            self.encode_word(&word, &mut ids);
        }
        ids
    }

    fn encode_word(&self, word: &str, ids: &mut Vec<TokenId>) {
        // char boundaries, so slicing below never splits a code point
        let mut bounds: Vec<usize> = word.char_indices().map(|(i, _)| i).collect();
        bounds.push(word.len());

        let n = bounds.len() - 1;
        let mut i = 0;
        while i < n {
            let mut matched = false;
            for j in (i + 1..=n).rev() {
                let candidate = &word[bounds[i]..bounds[j]];
                if let Some(&id) = self.token_to_id.get(candidate) {
                    ids.push(id);
                    i = j;
                    matched = true;
                    break;
                }
            }
            if !matched {
                warn!(
                    "no vocabulary entry for {:?}, skipping",
                    &word[bounds[i]..bounds[i + 1]]
                );
                i += 1;
            }
        }
    }
}

/// Character classes the word splitter distinguishes.
///
/// Non-ASCII letters and digits deliberately land in `Other`: vocabulary
/// fragments for them are byte-pair style and the splitter only needs to
/// keep them out of the ASCII runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Alpha,
    Digit,
    Whitespace,
    Other,
}

impl CharClass {
    fn of(c: char) -> Self {
        if c.is_ascii_alphabetic() {
            CharClass::Alpha
        } else if c.is_ascii_digit() {
            CharClass::Digit
        } else if c.is_whitespace() {
            CharClass::Whitespace
        } else {
            CharClass::Other
        }
    }
}

/// Length in chars of a contraction suffix ('s 't 're 've 'm 'll 'd)
/// starting at `rest[0]`, if one is present.
fn contraction_len(rest: &[char]) -> Option<usize> {
    if rest.len() < 2 || rest[0] != '\'' {
        return None;
    }
    match rest[1] {
        's' | 't' | 'm' | 'd' => Some(2),
        'r' | 'v' if rest.len() >= 3 && rest[2] == 'e' => Some(3),
        'l' if rest.len() >= 3 && rest[2] == 'l' => Some(3),
        _ => None,
    }
}

/// End of the homogeneous character-class run starting at `start`.
fn run_end(chars: &[char], start: usize) -> usize {
    let class = CharClass::of(chars[start]);
    let mut j = start + 1;
    while j < chars.len() && CharClass::of(chars[j]) == class {
        j += 1;
    }
    j
}

/// Splits text into words for vocabulary matching.
///
/// Rules, in priority order at each position:
/// - a contraction suffix is its own word;
/// - a single space glues onto the letter/digit/punctuation run after it;
/// - a whitespace run at the end of the input is one word;
/// - a longer whitespace run keeps its last character for the next word;
/// - any other character starts a run of its own class.
pub(crate) fn split_words(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut words = Vec::new();

    let mut i = 0;
    while i < chars.len() {
        if let Some(len) = contraction_len(&chars[i..]) {
            words.push(chars[i..i + len].iter().collect());
            i += len;
            continue;
        }

        let c = chars[i];
        if c.is_whitespace() {
            let j = run_end(&chars, i);
            if j == chars.len() {
                // trailing whitespace is kept whole
                words.push(chars[i..j].iter().collect());
                i = j;
            } else if j - i >= 2 {
                // leave the last whitespace char for the next word
                words.push(chars[i..j - 1].iter().collect());
                i = j - 1;
            } else if c == ' ' {
                let j = run_end(&chars, i + 1);
                words.push(chars[i..j].iter().collect());
                i = j;
            } else {
                words.push(c.to_string());
                i += 1;
            }
        } else {
            let j = run_end(&chars, i);
            words.push(chars[i..j].iter().collect());
            i = j;
        }
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tokens: &[&str]) -> Vocabulary {
        Vocabulary::from_entries(tokens.iter().map(|t| t.as_bytes().to_vec()).collect())
    }

    #[test]
    fn test_split_simple_sentence() {
        let words = split_words("Hello world");
        assert_eq!(words, vec!["Hello", " world"]);
    }

    #[test]
    fn test_split_contractions() {
        assert_eq!(split_words("don't"), vec!["don", "'t"]);
        assert_eq!(split_words("we're"), vec!["we", "'re"]);
        assert_eq!(split_words("I'll go"), vec!["I", "'ll", " go"]);
        // a bare apostrophe is punctuation, not a contraction
        assert_eq!(split_words("o'clock"), vec!["o", "'", "clock"]);
    }

    #[test]
    fn test_split_digits_and_punctuation() {
        assert_eq!(split_words("top 40 hits!"), vec!["top", " 40", " hits", "!"]);
        assert_eq!(split_words("a+b=42"), vec!["a", "+", "b", "=", "42"]);
    }

    #[test]
    fn test_split_whitespace_runs() {
        // the last space of an inner run joins the following word
        assert_eq!(split_words("a   b"), vec!["a", "  ", " b"]);
        // trailing whitespace stays whole
        assert_eq!(split_words("a   "), vec!["a", "   "]);
        // a lone tab before a letter is its own word
        assert_eq!(split_words("a\tb"), vec!["a", "\t", "b"]);
    }

    #[test]
    fn test_encode_longest_match() {
        let v = vocab(&["a", "b", "ab", "abc"]);
        assert_eq!(v.encode("abc"), vec![3]);
        assert_eq!(v.encode("ab"), vec![2]);
        assert_eq!(v.encode("ba"), vec![1, 0]);
    }

    #[test]
    fn test_encode_skips_unknown_chars() {
        let v = vocab(&["a", "c"]);
        // 'b' has no entry of any length and is dropped
        assert_eq!(v.encode("abc"), vec![0, 1]);
    }

    #[test]
    fn test_encode_across_words() {
        let v = vocab(&["Hello", " world", "wor", "ld"]);
        assert_eq!(v.encode("Hello world"), vec![0, 1]);
    }

    #[test]
    fn test_decode_round_trip() {
        let v = vocab(&["Hel", "lo", " wor", "ld"]);
        let ids = v.encode("Hello world");
        let text: String = ids.iter().filter_map(|&id| v.decode(id)).collect();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn test_end_of_text_from_vocab() {
        let v = vocab(&["a", "<|endoftext|>"]);
        assert_eq!(v.end_of_text_id(), 1);
    }

    #[test]
    fn test_end_of_text_fallback() {
        let v = vocab(&["a", "b"]);
        assert_eq!(v.end_of_text_id(), 50256);
    }

    #[test]
    fn test_invalid_utf8_entry_is_substituted() {
        let entries = vec![b"ok".to_vec(), vec![0xff, 0xfe]];
        let v = Vocabulary::from_entries(entries);
        assert_eq!(v.len(), 2);
        assert_eq!(v.decode(0), Some("ok"));
        assert!(v.decode(1).is_some());
    }

    #[test]
    fn test_decode_out_of_range() {
        let v = vocab(&["a"]);
        assert_eq!(v.decode(7), None);
    }
}
