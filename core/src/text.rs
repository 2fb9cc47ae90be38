//! Sentence-bounded text chunking for synthesis requests.

use crate::{Result, TtsError};

const TERMINATORS: [char; 5] = ['.', '!', '?', '…', '\n'];

/// Split `text` into pieces of at most `max_chars` characters, breaking on
/// sentence boundaries where possible and on whitespace otherwise.
pub fn split_sentences(text: &str, max_chars: usize) -> Result<Vec<String>> {
    if max_chars == 0 {
        return Err(TtsError::InvalidArgument("max_chars must be at least 1".into()));
    }
    if text.trim().is_empty() {
        return Err(TtsError::InvalidArgument("text cannot be empty".into()));
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if len > max_chars {
            flush(&mut current, &mut pieces);
            pieces.extend(split_words(&sentence, max_chars));
            continue;
        }
        let joined = if current.is_empty() {
            len
        } else {
            current.chars().count() + 1 + len
        };
        if joined > max_chars {
            flush(&mut current, &mut pieces);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    flush(&mut current, &mut pieces);

    Ok(pieces)
}

fn flush(current: &mut String, pieces: &mut Vec<String>) {
    if !current.is_empty() {
        pieces.push(std::mem::take(current));
    }
}

fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if TERMINATORS.contains(&c) {
            let s = current.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
            current.clear();
        }
    }
    let s = current.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
    out
}

fn split_words(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            flush(&mut current, &mut pieces);
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if !current.is_empty() && current.chars().count() + 1 + word_len > max_chars {
            flush(&mut current, &mut pieces);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    flush(&mut current, &mut pieces);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_piece() {
        let pieces = split_sentences("  Hello there. How are you?  ", 100).unwrap();
        assert_eq!(pieces, vec!["Hello there. How are you?"]);
    }

    #[test]
    fn test_packs_sentences_up_to_limit() {
        let pieces = split_sentences("One two. Three four! Five six?", 18).unwrap();
        assert_eq!(pieces, vec!["One two.", "Three four!", "Five six?"]);
        assert!(pieces.iter().all(|p| p.chars().count() <= 18));
    }

    #[test]
    fn test_long_sentence_split_on_whitespace() {
        let pieces = split_sentences("alpha beta gamma delta", 11).unwrap();
        assert_eq!(pieces, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_overlong_word_split_on_chars() {
        let pieces = split_sentences("abcdefghij", 4).unwrap();
        assert_eq!(pieces, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let pieces = split_sentences("héllo wörld…", 12).unwrap();
        assert_eq!(pieces, vec!["héllo wörld…"]);
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(matches!(
            split_sentences(" \n\t", 10),
            Err(TtsError::InvalidArgument(_))
        ));
    }
}
