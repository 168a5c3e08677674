//! Helpers for building and evaluating models from text corpora.
use std::fs;
use std::io;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::cache::SharedModel;
use crate::composer::ModelComposer;
use crate::dictionary::{CONTROL_WORDS, UNKNOWN};
use crate::lmfile::decode_line;
use crate::ngram::NGramModel;
use crate::options::PredictOptions;
use crate::tokenizer::{tokenize_context, tokenize_text};

static TARGET_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\-']*").expect("target word pattern is valid"));

/// Read a corpus file, as UTF-8 or else Latin-1.
///
/// With `max_lines`, only that many lines are returned (newlines included).
pub fn read_corpus<P: AsRef<Path>>(path: P, max_lines: Option<usize>) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let text = decode_line(&bytes);
    Ok(match max_lines {
        None => text,
        Some(n) => text.split_inclusive('\n').take(n).collect(),
    })
}

/// Read a vocabulary of one word per line, making sure the control words
/// are part of it.
pub fn read_vocabulary<P: AsRef<Path>>(path: P) -> io::Result<Vec<String>> {
    let text = read_corpus(path, None)?;
    let mut vocabulary: Vec<String> = text
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    for control in CONTROL_WORDS {
        if !vocabulary.iter().any(|w| w == control) {
            vocabulary.push(control.to_string());
        }
    }
    Ok(vocabulary)
}

/// The most frequent words of `tokens` with their counts, most frequent
/// first. Words seen fewer than `min_count` times are dropped; `max_words`
/// of 0 means no limit.
pub fn extract_vocabulary<S: AsRef<str>>(
    tokens: &[S],
    min_count: usize,
    max_words: usize,
) -> Vec<(String, usize)> {
    let mut counts: AHashMap<&str, usize> = AHashMap::new();
    for token in tokens {
        *counts.entry(token.as_ref()).or_insert(0) += 1;
    }

    let mut items: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .map(|(word, count)| (word.to_string(), count))
        .collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if max_words > 0 {
        items.truncate(max_words);
    }
    items
}

/// Replace tokens outside `vocabulary` by `<unk>`.
pub fn filter_tokens<S: AsRef<str>, V: AsRef<str>>(tokens: &[S], vocabulary: &[V]) -> Vec<String> {
    let known: AHashSet<&str> = vocabulary.iter().map(AsRef::as_ref).collect();
    tokens
        .iter()
        .map(|t| {
            let t = t.as_ref();
            if known.contains(t) { t } else { UNKNOWN }.to_string()
        })
        .collect()
}

/// Cross entropy in bits per word of `model` over `tokens`, and the
/// resulting perplexity.
///
/// Every token after the first is scored with up to `order - 1` words of
/// history. A zero probability makes both values infinite.
pub fn entropy<S: AsRef<str>>(model: &NGramModel, tokens: &[S]) -> (f64, f64) {
    let word_count = tokens.len();
    if word_count == 0 {
        return (0.0, 1.0);
    }

    let order = model.order().max(1);
    let mut log_sum = 0.0;
    for i in 1..word_count {
        let begin = (i + 1).saturating_sub(order);
        let ngram = &tokens[begin..=i];
        if ngram.len() < 2 {
            continue;
        }
        let p = model.get_probability(ngram);
        log_sum += if p > 0.0 { p.log2() } else { f64::NEG_INFINITY };
    }

    let entropy = -log_sum / word_count as f64;
    (entropy, entropy.exp2())
}

/// Keystrokes of a [`simulate_typing`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypingStats {
    /// Characters of the typed sentences.
    pub total_chars: usize,
    /// Keys pressed, accepting a correct prediction counts as one.
    pub pressed_keys: usize,
}

impl TypingStats {
    pub fn saved_keystrokes(&self) -> usize {
        self.total_chars.saturating_sub(self.pressed_keys)
    }

    /// Keystroke savings rate in percent.
    pub fn ksr(&self) -> f64 {
        if self.total_chars == 0 {
            return 0.0;
        }
        self.saved_keystrokes() as f64 * 100.0 / self.total_chars as f64
    }
}

/// Type `sentences` character by character, accepting the rest of the
/// current word whenever it is among the `limit` predictions of `query`.
///
/// With `learn`, each finished sentence is learned into that model, which
/// may also be one of the queried ones.
pub fn simulate_typing<S: AsRef<str>>(
    query: &ModelComposer,
    learn: Option<&SharedModel>,
    sentences: &[S],
    limit: i32,
) -> TypingStats {
    let mut stats = TypingStats::default();

    for sentence in sentences {
        let sentence = sentence.as_ref();
        let chars: Vec<char> = sentence.chars().collect();
        let mut input = String::new();
        let mut cursor = 0;

        while cursor < chars.len() {
            // typing starts a new sentence
            let (context, _) = tokenize_context(&format!(". {input}"));
            let prefix_len = context.last().map_or(0, |t| t.chars().count());
            let rest: String = chars[cursor.saturating_sub(prefix_len)..].iter().collect();
            let target = TARGET_WORD_RE.find(&rest).map_or("", |m| m.as_str());

            let choices = query.predict(&context, limit, PredictOptions::NONE);
            let added = if !target.is_empty() && choices.iter().any(|c| c == target) {
                target.chars().count().saturating_sub(prefix_len).max(1)
            } else {
                1
            };

            for c in &chars[cursor..(cursor + added).min(chars.len())] {
                input.push(*c);
                cursor += 1;
                stats.total_chars += 1;
            }
            stats.pressed_keys += 1;
        }

        if let Some(model) = learn {
            let (tokens, _) = tokenize_text(sentence, false);
            model.write().learn_tokens(&tokens, true);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shared(model: NGramModel) -> SharedModel {
        std::sync::Arc::new(parking_lot::RwLock::new(model))
    }

    #[test]
    fn typing_without_predictions_saves_nothing() {
        let composer = ModelComposer::overlay(vec![shared(NGramModel::dynamic(3))]);
        let stats = simulate_typing(&composer, None, &["whale whale"], 5);
        assert_eq!(stats, TypingStats { total_chars: 11, pressed_keys: 11 });
        assert_eq!(stats.ksr(), 0.0);
    }

    #[test]
    fn learned_sentences_save_keystrokes() {
        let model = shared(NGramModel::dynamic(3));
        let composer = ModelComposer::overlay(vec![model.clone()]);
        let sentence = "whale whale whale whale";

        let first = simulate_typing(&composer, Some(&model), &[sentence], 5);
        assert_eq!(first.pressed_keys, first.total_chars);

        let second = simulate_typing(&composer, Some(&model), &[sentence], 5);
        assert_eq!(second.total_chars, sentence.len());
        assert!(second.pressed_keys < second.total_chars / 2, "{second:?}");
        assert!(second.ksr() > 50.0);
        assert_eq!(second.saved_keystrokes(), second.total_chars - second.pressed_keys);
    }

    #[test]
    fn latin1_corpus_is_decoded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"caf\xe9 au lait\nsecond line\nthird\n").unwrap();

        assert_eq!(read_corpus(file.path(), None).unwrap(), "café au lait\nsecond line\nthird\n");
        assert_eq!(read_corpus(file.path(), Some(2)).unwrap(), "café au lait\nsecond line\n");
    }

    #[test]
    fn vocabulary_gets_control_words() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"whale\n<s>\nsea\n").unwrap();

        let vocabulary = read_vocabulary(file.path()).unwrap();
        assert_eq!(vocabulary, vec!["whale", "<s>", "sea", "<unk>", "</s>", "<num>"]);
    }

    #[test]
    fn most_frequent_words_first() {
        let tokens = ["b", "a", "b", "c", "a", "b", "d"];
        assert_eq!(
            extract_vocabulary(&tokens, 1, 0),
            vec![
                ("b".to_string(), 3),
                ("a".to_string(), 2),
                ("c".to_string(), 1),
                ("d".to_string(), 1)
            ]
        );
        assert_eq!(
            extract_vocabulary(&tokens, 2, 1),
            vec![("b".to_string(), 3)]
        );
    }

    #[test]
    fn unknown_tokens_are_filtered() {
        let filtered = filter_tokens(&["the", "kraken", "sea"], &["the", "sea"]);
        assert_eq!(filtered, vec!["the", "<unk>", "sea"]);
    }

    fn entropy_of(model: &NGramModel, tokens: &[&str]) -> f64 {
        entropy(model, tokens).0
    }

    #[test]
    fn seen_text_has_lower_entropy() {
        let mut model = NGramModel::dynamic(2);
        model.learn_tokens(&["a", "a", "a", "a"], true);

        let (bits, perplexity) = entropy(&model, &["a", "a", "a"]);
        assert!(bits >= 0.0);
        assert!(perplexity >= 1.0);

        let (unseen, _) = entropy(&model, &["x", "y"]);
        assert!(unseen > entropy_of(&model, &["a", "a", "a"]));
    }
}
