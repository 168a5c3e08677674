//! Dynamically updatable n-gram language model.
//!
//! One concrete model type covers all variants:
//! - `Unigram`: order fixed to 1, `p = count / total`;
//! - `Dynamic`: n-gram trie with Witten-Bell or absolute discounting;
//! - `DynamicKn`: additionally tracks Kneser-Ney continuation counts;
//! - `Cached`: Kneser-Ney capable plus recency weighting of recently used
//!   n-grams.
//!
//! Counts live in an [`NGramTrie`](crate::trie::NGramTrie) keyed by word ids
//! of the model's [`Dictionary`]. File IO is implemented in
//! [`crate::lmfile`].
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use crate::dictionary::{
    compare_words, Dictionary, PrefixMatcher, WordId, NUM_CONTROL_WORDS,
    SENTENCE_BEGIN, UNKNOWN, UNKNOWN_WORD_ID,
};
use crate::error::ModelError;
use crate::options::PredictOptions;
use crate::tokenizer::{split_sections, split_tokens};
use crate::trie::{NGramTrie, NodeId, ROOT};

/// Discount used while a level has no singletons or no doubletons yet.
const DEFAULT_DISCOUNT: f64 = 0.1;

/// Default Jelinek-Mercer weight for levels without an explicit lambda.
pub const DEFAULT_RECENCY_LAMBDA: f64 = 0.3;

/// Concrete model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Unigram,
    Dynamic,
    DynamicKn,
    Cached,
}

impl ModelKind {
    /// Highest order the variant can hold, `None` if unlimited.
    pub fn max_order(self) -> Option<usize> {
        match self {
            ModelKind::Unigram => Some(1),
            _ => None,
        }
    }

    /// Whether Kneser-Ney continuation counts are maintained.
    pub fn tracks_continuations(self) -> bool {
        matches!(self, ModelKind::DynamicKn | ModelKind::Cached)
    }

    pub fn supported_smoothings(self) -> &'static [Smoothing] {
        match self {
            ModelKind::Unigram => &[],
            ModelKind::Dynamic => &[Smoothing::WittenBell, Smoothing::AbsDisc],
            ModelKind::DynamicKn | ModelKind::Cached => &[
                Smoothing::WittenBell,
                Smoothing::AbsDisc,
                Smoothing::KneserNey,
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Unigram => "unigram",
            ModelKind::Dynamic => "dynamic",
            ModelKind::DynamicKn => "dynamic-kn",
            ModelKind::Cached => "cached",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unigram" => Ok(ModelKind::Unigram),
            "dynamic" => Ok(ModelKind::Dynamic),
            "dynamic-kn" | "kn" => Ok(ModelKind::DynamicKn),
            "cached" => Ok(ModelKind::Cached),
            _ => Err(format!("unknown model kind '{s}'")),
        }
    }
}

/// Smoothing of the count-based probabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Smoothing {
    WittenBell,
    #[default]
    AbsDisc,
    KneserNey,
}

impl Smoothing {
    pub fn name(self) -> &'static str {
        match self {
            Smoothing::WittenBell => "witten-bell",
            Smoothing::AbsDisc => "abs-disc",
            Smoothing::KneserNey => "kneser-ney",
        }
    }
}

impl fmt::Display for Smoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Smoothing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "witten-bell" | "wb" => Ok(Smoothing::WittenBell),
            "abs-disc" | "ad" => Ok(Smoothing::AbsDisc),
            "kneser-ney" | "kn" => Ok(Smoothing::KneserNey),
            _ => Err(format!("unknown smoothing '{s}'")),
        }
    }
}

/// Recency weighting parameters of `Cached` models.
///
/// Recently counted n-grams get weight `2^(-(now - time) / halflife)`; the
/// Jelinek-Mercer interpolated recency distribution is blended with the
/// count based one as `(1 - ratio) * base + ratio * recency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyConfig {
    pub ratio: f64,
    /// Number of count events until a weight drops to one half.
    pub halflife: u32,
    /// Interpolation weight per history length; missing levels use
    /// [`DEFAULT_RECENCY_LAMBDA`].
    pub lambdas: Vec<f64>,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            halflife: 100,
            lambdas: Vec::new(),
        }
    }
}

impl RecencyConfig {
    pub fn lambda(&self, level: usize) -> f64 {
        self.lambdas
            .get(level)
            .copied()
            .unwrap_or(DEFAULT_RECENCY_LAMBDA)
    }
}

/// A candidate word with its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionChoice {
    pub word: String,
    pub p: f64,
}

/// One stored n-gram as yielded by [`NGramModel::iter_ngrams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NGramEntry {
    pub ngram: Vec<String>,
    pub count: u32,
    /// Time of last use; only present for recency tracking models.
    pub time: Option<u32>,
}

/// N-gram language model.
///
/// Invariants:
/// - control words occupy word ids `0..4` and are counted once on `clear`;
/// - a parent n-gram is never counted less than any of its extensions when
///   learned through [`NGramModel::learn_tokens`].
#[derive(Debug)]
pub struct NGramModel {
    kind: ModelKind,
    order: usize,
    smoothing: Smoothing,
    recency: Option<RecencyConfig>,

    pub(crate) dictionary: Dictionary,
    pub(crate) trie: NGramTrie,

    /// count-of-counts per level, for the discount estimate
    n1s: Vec<u32>,
    n2s: Vec<u32>,
    ds: Vec<f64>,

    pub(crate) current_time: u32,

    modified: AtomicBool,
    load_error: bool,
    load_error_message: String,
}

impl NGramModel {
    /// Create an empty model of `kind`.
    ///
    /// Unigram models always have order 1, trie based variants at least 2.
    pub fn new(kind: ModelKind, order: usize) -> Self {
        let recency = match kind {
            ModelKind::Cached => Some(RecencyConfig::default()),
            _ => None,
        };
        let mut model = Self {
            kind,
            order: 0,
            smoothing: Smoothing::default(),
            recency,
            dictionary: Dictionary::new(),
            trie: NGramTrie::new(),
            n1s: Vec::new(),
            n2s: Vec::new(),
            ds: Vec::new(),
            current_time: 0,
            modified: AtomicBool::new(false),
            load_error: false,
            load_error_message: String::new(),
        };
        model.set_order(order);
        model
    }

    pub fn unigram() -> Self {
        Self::new(ModelKind::Unigram, 1)
    }

    pub fn dynamic(order: usize) -> Self {
        Self::new(ModelKind::Dynamic, order)
    }

    pub fn dynamic_kn(order: usize) -> Self {
        Self::new(ModelKind::DynamicKn, order)
    }

    pub fn cached(order: usize) -> Self {
        Self::new(ModelKind::Cached, order)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Reset the model to `order` (clamped to what the kind supports).
    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = match self.kind {
            ModelKind::Unigram => 1,
            _ => order.max(2),
        };
        self.clear();
    }

    /// Drop all n-grams and words; control words are counted once.
    pub fn clear(&mut self) {
        self.dictionary.clear();
        self.trie.clear();
        self.n1s = vec![0; self.order];
        self.n2s = vec![0; self.order];
        self.ds = vec![DEFAULT_DISCOUNT; self.order];
        self.current_time = 0;

        // a zero count would throw off the normalization of witten-bell
        for wid in 0..NUM_CONTROL_WORDS as WordId {
            self.count_ngram_ids(&[wid], 1);
        }
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    pub fn supports_smoothing(&self, smoothing: Smoothing) -> bool {
        self.kind.supported_smoothings().contains(&smoothing)
    }

    pub fn set_smoothing(&mut self, smoothing: Smoothing) -> Result<(), ModelError> {
        if !self.supports_smoothing(smoothing) {
            return Err(ModelError::UnsupportedSmoothing {
                kind: self.kind.name(),
                smoothing: smoothing.to_string(),
            });
        }
        self.smoothing = smoothing;
        Ok(())
    }

    /// Recency parameters, `None` for models without recency tracking.
    pub fn recency(&self) -> Option<&RecencyConfig> {
        self.recency.as_ref()
    }

    pub fn recency_mut(&mut self) -> Option<&mut RecencyConfig> {
        self.recency.as_mut()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// `1` exact match, `-n` for n partial matches, `0` no match.
    pub fn lookup_word(&self, word: &str) -> i64 {
        self.dictionary.lookup_word(word)
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(AtomicOrdering::Acquire)
    }

    /// Callable through a shared reference so saving under a read lock can
    /// clear the flag.
    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, AtomicOrdering::Release);
    }

    pub fn load_error(&self) -> bool {
        self.load_error
    }

    pub fn load_error_message(&self) -> &str {
        &self.load_error_message
    }

    pub fn set_load_error(&mut self, message: impl Into<String>) {
        self.load_error = true;
        self.load_error_message = message.into();
    }

    pub fn clear_load_error(&mut self) {
        self.load_error = false;
        self.load_error_message.clear();
    }

    /// Add `increment` to the count of `ngram`.
    ///
    /// # Arguments
    /// * `ngram` - 1..=order words
    /// * `increment` - may be negative; counts never drop below zero
    /// * `allow_new_words` - add unseen words to the vocabulary, otherwise
    ///   reject the n-gram
    ///
    /// # Returns
    /// The new count, or `None` if the n-gram was rejected.
    pub fn count_ngram<S: AsRef<str>>(
        &mut self,
        ngram: &[S],
        increment: i64,
        allow_new_words: bool,
    ) -> Option<u32> {
        if ngram.is_empty() || ngram.len() > self.order {
            return None;
        }

        let mut wids = Vec::with_capacity(ngram.len());
        for word in ngram {
            let word = word.as_ref();
            let wid = match self.dictionary.word_to_id(word) {
                Some(wid) => wid,
                None if allow_new_words => self.dictionary.add_word(word),
                None => return None,
            };
            wids.push(wid);
        }
        Some(self.count_ngram_ids(&wids, increment))
    }

    /// Set the count of `ngram`, adding words as needed.
    pub(crate) fn set_ngram_count<S: AsRef<str>>(&mut self, ngram: &[S], count: u32) -> Option<u32> {
        let current = i64::from(self.get_ngram_count(ngram));
        self.count_ngram(ngram, i64::from(count) - current, true)
    }

    pub(crate) fn count_ngram_ids(&mut self, wids: &[WordId], increment: i64) -> u32 {
        let n = wids.len();
        let node = self.trie.add_node(wids);
        let old = self.trie.node(node).count;

        if old == 1 {
            self.n1s[n - 1] -= 1;
        }
        if old == 2 {
            self.n2s[n - 1] -= 1;
        }

        if self.kind.tracks_continuations() && increment > 0 && old == 0 {
            self.count_continuation(wids);
        }

        let count = (i64::from(old) + increment).clamp(0, i64::from(u32::MAX)) as u32;
        self.trie.node_mut(node).count = count;

        if self.recency.is_some() {
            self.current_time += 1;
            self.trie.node_mut(node).time = self.current_time;
        }

        if count == 1 {
            self.n1s[n - 1] += 1;
        }
        if count == 2 {
            self.n2s[n - 1] += 1;
        }
        self.update_discounts();

        count
    }

    /// Kneser-Ney bookkeeping for the first occurrence of `wids`.
    fn count_continuation(&mut self, wids: &[WordId]) {
        let n = wids.len();

        // "we saw" -> one more predecessor type for "saw"
        let wxr = self.trie.add_node(&wids[1..]);
        self.trie.node_mut(wxr).n1pxr += 1;

        // "we saw whales" -> one more surrounding pair for "saw"
        if n >= 2 {
            let wxrx = self.trie.add_node(&wids[1..n - 1]);
            self.trie.node_mut(wxrx).n1pxrx += 1;
        }
    }

    fn update_discounts(&mut self) {
        for i in 0..self.order {
            let n1 = f64::from(self.n1s[i]);
            let n2 = f64::from(self.n2s[i]);
            self.ds[i] = if n1 == 0.0 || n2 == 0.0 {
                DEFAULT_DISCOUNT
            } else {
                // deleted estimation, Ney, Essen and Kneser 1994
                n1 / (n1 + 2.0 * n2)
            };
        }
    }

    /// Discount of the given level (0 = unigrams).
    pub fn discount(&self, level: usize) -> f64 {
        self.ds.get(level).copied().unwrap_or(DEFAULT_DISCOUNT)
    }

    pub fn get_ngram_count<S: AsRef<str>>(&self, ngram: &[S]) -> u32 {
        let wids: Option<Vec<WordId>> = ngram
            .iter()
            .map(|w| self.dictionary.word_to_id(w.as_ref()))
            .collect();
        wids.and_then(|wids| self.trie.get_node(&wids))
            .filter(|node| *node != ROOT)
            .map_or(0, |node| self.trie.node(node).count)
    }

    /// N-grams of length 1..=order in `tokens`.
    ///
    /// `<unk>` never enters the model: the stream is split there and the
    /// token dropped. N-grams never cross a `<s>`; each sentence section
    /// starts with its `<s>`.
    pub fn extract_ngrams<'t, S: AsRef<str>>(&self, tokens: &'t [S]) -> Vec<Vec<&'t str>> {
        let mut ngrams = Vec::new();
        for unk_section in split_tokens(tokens, UNKNOWN, false) {
            for section in split_sections(unk_section, SENTENCE_BEGIN, true) {
                for i in 0..section.len() {
                    for n in 1..=self.order {
                        if i + n <= section.len() {
                            ngrams.push(section[i..i + n].to_vec());
                        }
                    }
                }
            }
        }
        ngrams
    }

    /// Count every n-gram of `tokens` and mark the model modified.
    pub fn learn_tokens<S: AsRef<str>>(&mut self, tokens: &[S], allow_new_words: bool) {
        for ngram in self.extract_ngrams(tokens) {
            self.count_ngram(&ngram, 1, allow_new_words);
        }
        self.set_modified(true);
    }

    /// Number of n-gram types and total occurrences per level.
    pub fn get_counts(&self) -> (Vec<usize>, Vec<u64>) {
        let mut types = vec![0; self.order];
        let mut totals = vec![0; self.order];
        for level in 1..=self.order {
            for (_, node) in self.trie.nodes_at_depth(level) {
                let count = self.trie.node(node).count;
                if count > 0 {
                    types[level - 1] += 1;
                    totals[level - 1] += u64::from(count);
                }
            }
        }
        (types, totals)
    }

    /// Stored n-grams level by level in canonical order: control words
    /// first, then by codepoint. Helper nodes with zero count are skipped.
    ///
    /// Each call starts a fresh pass; levels are collected on demand.
    pub fn iter_ngrams(&self) -> NGramIter<'_> {
        NGramIter {
            model: self,
            level: 0,
            pending: Vec::new().into_iter(),
        }
    }

    pub(crate) fn level_entries(&self, level: usize) -> Vec<NGramEntry> {
        let mut entries: Vec<(Vec<&str>, NodeId)> = self
            .trie
            .nodes_at_depth(level)
            .into_iter()
            .filter(|(_, node)| self.trie.node(*node).count > 0)
            .map(|(wids, node)| {
                let words = wids
                    .iter()
                    .map(|wid| self.dictionary.id_to_word(*wid).unwrap_or(""))
                    .collect();
                (words, node)
            })
            .collect();
        entries.sort_by(|(a, _), (b, _)| compare_ngrams(a, b));

        let with_time = self.recency.is_some();
        entries
            .into_iter()
            .map(|(words, node)| {
                let node = self.trie.node(node);
                NGramEntry {
                    ngram: words.into_iter().map(str::to_string).collect(),
                    count: node.count,
                    time: with_time.then_some(node.time),
                }
            })
            .collect()
    }

    /// Copy of the model without rarely seen n-grams.
    ///
    /// `prune_counts[k]` is the threshold for n-grams of length `k + 1`,
    /// the last entry applies to all longer n-grams. An n-gram is kept if
    /// its count exceeds the threshold; `-1` drops the level and all longer
    /// ones, and trailing `-1`s shrink the order of the result.
    pub fn prune(&self, prune_counts: &[i64]) -> NGramModel {
        let mut order = self.order;
        for count in prune_counts.iter().rev() {
            if *count != -1 {
                break;
            }
            order = order.saturating_sub(1);
        }

        let mut model = NGramModel::new(self.kind, order);
        model.smoothing = self.smoothing;
        model.recency = self.recency.clone();

        let threshold = |level: usize| match prune_counts.len() {
            0 => 0,
            len => prune_counts[len.min(level) - 1],
        };
        let drop_from = (1..=self.order)
            .find(|level| threshold(*level) == -1)
            .unwrap_or(usize::MAX);

        for entry in self.iter_ngrams() {
            let level = entry.ngram.len();
            if level < drop_from && i64::from(entry.count) > threshold(level) {
                model.set_ngram_count(&entry.ngram, entry.count);
            }
        }
        model
    }

    /// Copy all n-grams into `target`, replacing counts it already has.
    ///
    /// The target's order is kept; longer n-grams are rejected. The
    /// smoothing is copied when the target supports it.
    pub fn copy_into(&self, target: &mut NGramModel) {
        if target.supports_smoothing(self.smoothing) {
            target.smoothing = self.smoothing;
        }
        for entry in self.iter_ngrams() {
            if entry.ngram.len() <= target.order {
                target.set_ngram_count(&entry.ngram, entry.count);
            }
        }
    }

    /// Ranked completions for `context`.
    ///
    /// The last context token is the typed prefix of the word to complete,
    /// the tokens before it are the history.
    ///
    /// # Arguments
    /// * `limit` - maximum number of results, `<= 0` for all
    /// * `options` - candidate filters and result post-processing
    pub fn predictp<S: AsRef<str>>(
        &self,
        context: &[S],
        limit: i32,
        options: PredictOptions,
    ) -> Vec<PredictionChoice> {
        let Some((prefix, history)) = context.split_last() else {
            return Vec::new();
        };
        let history: Vec<WordId> = history
            .iter()
            .map(|w| {
                self.dictionary
                    .word_to_id(w.as_ref())
                    .unwrap_or(UNKNOWN_WORD_ID)
            })
            .collect();

        let candidates = self.get_candidates(&history, prefix.as_ref(), options);
        let probabilities = self.get_probs(&history, &candidates);

        let choices = candidates
            .iter()
            .zip(probabilities)
            .filter_map(|(wid, p)| {
                self.dictionary.id_to_word(*wid).map(|word| PredictionChoice {
                    word: word.to_string(),
                    p,
                })
            })
            .collect();
        rank_choices(choices, limit, options)
    }

    /// Like [`predictp`](Self::predictp), words only.
    pub fn predict<S: AsRef<str>>(
        &self,
        context: &[S],
        limit: i32,
        options: PredictOptions,
    ) -> Vec<String> {
        self.predictp(context, limit, options)
            .into_iter()
            .map(|c| c.word)
            .collect()
    }

    /// Probability of the last word of `ngram` following the words before
    /// it; unknown words get the probability of `<unk>`.
    pub fn get_probability<S: AsRef<str>>(&self, ngram: &[S]) -> f64 {
        probability_from(ngram, |context| {
            self.predictp(
                context,
                -1,
                PredictOptions::NORMALIZE | PredictOptions::INCLUDE_CONTROL_WORDS,
            )
        })
    }

    fn get_candidates(&self, history: &[WordId], prefix: &str, options: PredictOptions) -> Vec<WordId> {
        let has_prefix = !prefix.is_empty();
        let only_predictions = !has_prefix
            && !history.is_empty()
            && !options.contains(PredictOptions::INCLUDE_CONTROL_WORDS);

        if has_prefix || only_predictions || options.intersects(PredictOptions::FILTER_OPTIONS) {
            let matcher = PrefixMatcher::new(prefix, options);
            if only_predictions {
                // skip words that were only ever seen as unigrams
                let successors = self.words_with_predictions(history);
                self.dictionary.filter_ids(&successors, &matcher)
            } else {
                self.dictionary.prefix_search(&matcher)
            }
        } else {
            let min_wid = if options.contains(PredictOptions::INCLUDE_CONTROL_WORDS) {
                0
            } else {
                NUM_CONTROL_WORDS
            };
            (min_wid as WordId..self.dictionary.len() as WordId).collect()
        }
    }

    fn words_with_predictions(&self, history: &[WordId]) -> Vec<WordId> {
        if self.kind == ModelKind::Unigram {
            return Vec::new();
        }
        let Some(last) = history.last() else {
            return Vec::new();
        };
        self.trie.get_node(&[*last]).map_or_else(Vec::new, |node| {
            self.trie
                .node(node)
                .children()
                .filter(|(_, child)| self.trie.node(*child).count > 0)
                .map(|(wid, _)| wid)
                .collect()
        })
    }

    /// Probability of each of `words` following `history`.
    fn get_probs(&self, history: &[WordId], words: &[WordId]) -> Vec<f64> {
        if self.kind == ModelKind::Unigram {
            return self.probs_unigram(words);
        }

        // pad or cut the history to order - 1 words
        let keep = history.len().min(self.order - 1);
        let mut h = vec![UNKNOWN_WORD_ID; self.order - 1 - keep];
        h.extend_from_slice(&history[history.len() - keep..]);

        let index = self.candidate_index(words);
        let mut probabilities = self.probs_counts(&h, words, &index);

        if let Some(recency) = self.recency.as_ref().filter(|r| r.ratio != 0.0) {
            let recent = self.probs_recency(&h, words, &index, recency);
            for (p, pr) in probabilities.iter_mut().zip(recent) {
                *p = *p * (1.0 - recency.ratio) + pr * recency.ratio;
            }
        }
        probabilities
    }

    fn probs_unigram(&self, words: &[WordId]) -> Vec<f64> {
        let total = self.trie.sum_child_counts(ROOT);
        if total == 0 {
            return vec![1.0 / self.dictionary.len() as f64; words.len()];
        }
        words
            .iter()
            .map(|wid| {
                let count = self.trie.get_node(&[*wid]).map_or(0, |n| self.trie.node(n).count);
                f64::from(count) / total as f64
            })
            .collect()
    }

    /// Position of each word id in `words`, `usize::MAX` if not a candidate.
    fn candidate_index(&self, words: &[WordId]) -> Vec<usize> {
        let mut index = vec![usize::MAX; self.dictionary.len()];
        for (i, wid) in words.iter().enumerate() {
            index[*wid as usize] = i;
        }
        index
    }

    /// Interpolated count based probabilities, from the uniform
    /// distribution up through every history suffix.
    fn probs_counts(&self, h: &[WordId], words: &[WordId], index: &[usize]) -> Vec<f64> {
        let n = h.len() + 1;
        let mut vp = vec![1.0 / self.dictionary.len() as f64; words.len()];
        let mut vc = vec![0.0; words.len()];

        for j in 0..n {
            let Some(hnode) = self.trie.get_node(&h[n - 1 - j..]) else {
                continue;
            };
            let n1prx = f64::from(self.trie.num_successors(hnode));
            if n1prx == 0.0 {
                // unknown history, keep the lower order estimate
                break;
            }
            let d = self.ds[j];

            if self.smoothing == Smoothing::KneserNey && j < n - 1 {
                let n1pxrx = f64::from(self.trie.node(hnode).n1pxrx);
                if n1pxrx == 0.0 {
                    continue;
                }
                vc.iter_mut().for_each(|c| *c = 0.0);
                let mut successors = 0.0;
                for (wid, child) in self.trie.node(hnode).children() {
                    let n1pxr = self.trie.node(child).n1pxr;
                    if n1pxr == 0 {
                        continue;
                    }
                    successors += 1.0;
                    if let Some(i) = candidate(index, wid) {
                        vc[i] = f64::from(n1pxr);
                    }
                }
                let l1 = d / n1pxrx * successors;
                for (p, c) in vp.iter_mut().zip(&vc) {
                    *p = (c - d).max(0.0) / n1pxrx + l1 * *p;
                }
                continue;
            }

            let cs = self.trie.sum_child_counts(hnode) as f64;
            if cs == 0.0 {
                continue;
            }
            vc.iter_mut().for_each(|c| *c = 0.0);
            for (wid, child) in self.trie.node(hnode).children() {
                if let Some(i) = candidate(index, wid) {
                    vc[i] = f64::from(self.trie.node(child).count);
                }
            }

            match self.smoothing {
                Smoothing::WittenBell => {
                    let l1 = n1prx / (n1prx + cs);
                    for (p, c) in vp.iter_mut().zip(&vc) {
                        *p = (1.0 - l1) * (c / cs) + l1 * *p;
                    }
                }
                Smoothing::AbsDisc | Smoothing::KneserNey => {
                    let l1 = d / cs * n1prx;
                    for (p, c) in vp.iter_mut().zip(&vc) {
                        *p = (c - d).max(0.0) / cs + l1 * *p;
                    }
                }
            }
        }
        vp
    }

    /// Jelinek-Mercer interpolation of exponentially decaying recency
    /// weights.
    fn probs_recency(
        &self,
        h: &[WordId],
        words: &[WordId],
        index: &[usize],
        recency: &RecencyConfig,
    ) -> Vec<f64> {
        let n = h.len() + 1;
        let halflife = f64::from(recency.halflife.max(1));
        let mut vp = vec![1.0 / self.dictionary.len() as f64; words.len()];
        let mut vt = vec![0.0; words.len()];

        for j in 0..n {
            let Some(hnode) = self.trie.get_node(&h[n - 1 - j..]) else {
                continue;
            };
            if self.trie.num_successors(hnode) == 0 {
                break;
            }

            vt.iter_mut().for_each(|t| *t = 0.0);
            let mut cs = 0.0;
            for (wid, child) in self.trie.node(hnode).children() {
                let node = self.trie.node(child);
                if node.count == 0 {
                    continue;
                }
                let age = f64::from(self.current_time.saturating_sub(node.time));
                let weight = (-age / halflife).exp2();
                cs += weight;
                if let Some(i) = candidate(index, wid) {
                    vt[i] = weight;
                }
            }
            if cs == 0.0 {
                continue;
            }

            let lambda = recency.lambda(j);
            for (p, t) in vp.iter_mut().zip(&vt) {
                *p = lambda * (t / cs) + (1.0 - lambda) * *p;
            }
        }
        vp
    }
}

fn candidate(index: &[usize], wid: WordId) -> Option<usize> {
    index.get(wid as usize).copied().filter(|i| *i != usize::MAX)
}

/// Lexicographic comparison of n-grams by [`compare_words`].
pub fn compare_ngrams<S: AsRef<str>>(a: &[S], b: &[S]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare_words(x.as_ref(), y.as_ref()))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

/// Sort, truncate and optionally normalize prediction results.
pub(crate) fn rank_choices(
    mut choices: Vec<PredictionChoice>,
    limit: i32,
    options: PredictOptions,
) -> Vec<PredictionChoice> {
    if !options.contains(PredictOptions::NO_SORT) {
        // stable, equal probabilities keep vocabulary order
        choices.sort_by(|a, b| b.p.partial_cmp(&a.p).unwrap_or(Ordering::Equal));
    }
    if limit > 0 {
        choices.truncate(limit as usize);
    }
    if options.contains(PredictOptions::NORMALIZE) {
        let sum: f64 = choices.iter().map(|c| c.p).sum();
        if sum > 0.0 {
            choices.iter_mut().for_each(|c| c.p /= sum);
        }
    }
    choices
}

/// Shared by models and composers: predict after the history of `ngram` and
/// look up its last word, falling back to `<unk>`.
pub(crate) fn probability_from<S, F>(ngram: &[S], predict: F) -> f64
where
    S: AsRef<str>,
    F: FnOnce(&[&str]) -> Vec<PredictionChoice>,
{
    let Some((word, history)) = ngram.split_last() else {
        return 0.0;
    };
    let mut context: Vec<&str> = history.iter().map(AsRef::as_ref).collect();
    context.push("");

    let results = predict(&context);
    results
        .iter()
        .find(|c| c.word == word.as_ref())
        .or_else(|| results.iter().find(|c| c.word == UNKNOWN))
        .map_or(0.0, |c| c.p)
}

/// Iterator over the stored n-grams, see [`NGramModel::iter_ngrams`].
pub struct NGramIter<'a> {
    model: &'a NGramModel,
    level: usize,
    pending: std::vec::IntoIter<NGramEntry>,
}

impl Iterator for NGramIter<'_> {
    type Item = NGramEntry;

    fn next(&mut self) -> Option<NGramEntry> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(entry);
            }
            if self.level >= self.model.order {
                return None;
            }
            self.level += 1;
            self.pending = self.model.level_entries(self.level).into_iter();
        }
    }
}
