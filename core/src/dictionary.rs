//! Vocabulary of a language model: word ↔ id mapping and prefix matching.
use ahash::AHashMap;
use std::cmp::Ordering;

use crate::options::PredictOptions;
use crate::utils;

/// Index of a word in a [`Dictionary`].
pub type WordId = u32;

pub const UNKNOWN: &str = "<unk>";
pub const SENTENCE_BEGIN: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";
pub const NUMBER: &str = "<num>";

/// Control words in their fixed id order.
pub const CONTROL_WORDS: [&str; 4] = [UNKNOWN, SENTENCE_BEGIN, SENTENCE_END, NUMBER];
pub const NUM_CONTROL_WORDS: usize = CONTROL_WORDS.len();

pub const UNKNOWN_WORD_ID: WordId = 0;

/// Word ↔ id mapping. Control words always occupy ids `0..4`.
#[derive(Debug, Clone)]
pub struct Dictionary {
    words: Vec<String>,
    index: AHashMap<String, WordId>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    pub fn new() -> Self {
        let mut dictionary = Self {
            words: Vec::new(),
            index: AHashMap::new(),
        };
        dictionary.clear();
        dictionary
    }

    /// Drop all words except the control words.
    pub fn clear(&mut self) {
        self.words.clear();
        self.index.clear();
        for word in CONTROL_WORDS {
            self.add_word(word);
        }
    }

    /// Number of word types, control words included.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word_to_id(&self, word: &str) -> Option<WordId> {
        self.index.get(word).copied()
    }

    pub fn id_to_word(&self, wid: WordId) -> Option<&str> {
        self.words.get(wid as usize).map(String::as_str)
    }

    /// Add `word` if missing and return its id.
    pub fn add_word(&mut self, word: &str) -> WordId {
        if let Some(wid) = self.index.get(word) {
            return *wid;
        }
        let wid = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.index.insert(word.to_string(), wid);
        wid
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Match count for `word`.
    ///
    /// # Returns
    /// `1` for an exact match, `-n` when `n` words start with `word`, `0`
    /// when nothing matches or `word` is empty.
    pub fn lookup_word(&self, word: &str) -> i64 {
        if word.is_empty() {
            return 0;
        }
        if self.index.contains_key(word) {
            return 1;
        }
        let partial = self.words.iter().filter(|w| w.starts_with(word)).count();
        -(partial as i64)
    }

    /// Ids of all words accepted by `matcher`, in id order.
    ///
    /// Control words take part only with `INCLUDE_CONTROL_WORDS`.
    pub fn prefix_search(&self, matcher: &PrefixMatcher) -> Vec<WordId> {
        let min_wid = min_word_id(matcher.options);
        self.words
            .iter()
            .enumerate()
            .skip(min_wid)
            .filter(|(_, word)| matcher.matches(word))
            .map(|(wid, _)| wid as WordId)
            .collect()
    }

    /// Restrict `wids` to the ones accepted by `matcher`, keeping their order.
    pub fn filter_ids(&self, wids: &[WordId], matcher: &PrefixMatcher) -> Vec<WordId> {
        let min_wid = min_word_id(matcher.options) as WordId;
        wids.iter()
            .copied()
            .filter(|wid| *wid >= min_wid)
            .filter(|wid| self.id_to_word(*wid).map_or(false, |w| matcher.matches(w)))
            .collect()
    }
}

fn min_word_id(options: PredictOptions) -> usize {
    if options.contains(PredictOptions::INCLUDE_CONTROL_WORDS) {
        0
    } else {
        NUM_CONTROL_WORDS
    }
}

/// Canonical on-disk order of words: control words first in their fixed
/// order, everything else by codepoint.
pub fn compare_words(a: &str, b: &str) -> Ordering {
    let rank = |w: &str| CONTROL_WORDS.iter().position(|c| *c == w);
    match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Prefix comparison with optional case and accent folding.
///
/// The typed prefix is folded once up front; candidate characters are folded
/// while comparing. The smart variants fold a candidate character only when
/// the typed character is lower case, or carries no accent.
#[derive(Debug, Clone)]
pub struct PrefixMatcher {
    prefix: Vec<char>,
    options: PredictOptions,
}

impl PrefixMatcher {
    pub fn new(prefix: &str, options: PredictOptions) -> Self {
        let fold_case = options.contains(PredictOptions::CASE_INSENSITIVE)
            && !options.contains(PredictOptions::CASE_INSENSITIVE_SMART);
        let fold_accents = options.contains(PredictOptions::ACCENT_INSENSITIVE)
            && !options.contains(PredictOptions::ACCENT_INSENSITIVE_SMART);

        let prefix = prefix
            .chars()
            .map(|c| if fold_case { utils::to_lower(c) } else { c })
            .map(|c| if fold_accents { utils::remove_accent(c) } else { c })
            .collect();

        Self { prefix, options }
    }

    pub fn matches(&self, word: &str) -> bool {
        let opts = self.options;

        if let Some(first) = word.chars().next() {
            if opts.contains(PredictOptions::IGNORE_CAPITALIZED) && first.is_uppercase() {
                return false;
            }
            if opts.contains(PredictOptions::IGNORE_NON_CAPITALIZED) && !first.is_uppercase() {
                return false;
            }
        }

        let mut chars = word.chars();
        for &typed in &self.prefix {
            let Some(mut c) = chars.next() else {
                return false;
            };

            if opts.contains(PredictOptions::CASE_INSENSITIVE_SMART) {
                if !typed.is_uppercase() {
                    c = utils::to_lower(c);
                }
            } else if opts.contains(PredictOptions::CASE_INSENSITIVE) {
                c = utils::to_lower(c);
            }

            if opts.contains(PredictOptions::ACCENT_INSENSITIVE_SMART) {
                if !utils::has_accent(typed) {
                    c = utils::remove_accent(c);
                }
            } else if opts.contains(PredictOptions::ACCENT_INSENSITIVE) {
                c = utils::remove_accent(c);
            }

            if c != typed {
                return false;
            }
        }
        true
    }
}
