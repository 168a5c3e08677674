//! Word prediction service tying tokenizer, model cache and composer
//! together.
//!
//! The engine is constructed once and shared by reference (typically in an
//! `Arc`); all operations take `&self`. Its lifecycle:
//!
//! ```text
//! Uninitialized --set_models--> Configured --first use--> Serving --cleanup--> Shutdown
//! ```
//!
//! Everything except the pure tokenizer pass-throughs fails with
//! [`PredictError::InvalidState`] before `set_models` and after `cleanup`.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{
    Mutex, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autosave::AutoSaveScheduler;
use crate::cache::{ModelCache, SharedModel};
use crate::composer::{parse_lmdesc, ModelComposer};
use crate::dictionary::UNKNOWN;
use crate::error::PredictError;
use crate::ngram::{NGramModel, Smoothing};
use crate::options::PredictOptions;
use crate::tokenizer::{self, Span};
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    Configured,
    Serving,
    Shutdown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Configured => "configured",
            EngineState::Serving => "serving",
            EngineState::Shutdown => "shut down",
        };
        f.write_str(name)
    }
}

/// A token of [`PredictionEngine::lookup_text`] with its byte span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupToken {
    pub start: usize,
    pub end: usize,
    pub token: String,
}

#[derive(Debug, Default, Clone)]
struct ModelLists {
    /// persistent followed by scratch ids, the query order
    models: Vec<String>,
    persistent: Vec<String>,
    auto_learn: Vec<String>,
    scratch: Vec<String>,
}

pub struct PredictionEngine {
    config: Config,
    cache: Arc<ModelCache>,
    /// Held for reading by every operation, for writing by state changes.
    state: RwLock<EngineState>,
    lists: RwLock<ModelLists>,
    autosave: Mutex<Option<AutoSaveScheduler>>,
}

impl PredictionEngine {
    /// Create the engine and start auto-saving, unless
    /// `auto_save_interval_secs` is 0.
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(ModelCache::from_config(&config));
        let autosave = (config.auto_save_interval_secs > 0).then(|| {
            AutoSaveScheduler::with_timing(
                Arc::clone(&cache),
                Duration::from_secs(config.auto_save_tick_secs.max(1)),
                Duration::from_secs(config.auto_save_interval_secs),
            )
        });

        Self {
            config,
            cache,
            state: RwLock::new(EngineState::Uninitialized),
            lists: RwLock::new(ModelLists::default()),
            autosave: Mutex::new(autosave),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Fail unless configured; the first successful call starts serving.
    ///
    /// The returned guard keeps `cleanup` waiting until the operation is
    /// done.
    fn begin(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, EngineState>, PredictError> {
        let state = self.state.upgradable_read();
        match *state {
            EngineState::Serving => Ok(RwLockUpgradableReadGuard::downgrade(state)),
            EngineState::Configured => {
                let mut state = RwLockUpgradableReadGuard::upgrade(state);
                *state = EngineState::Serving;
                Ok(RwLockWriteGuard::downgrade(state))
            }
            current => Err(PredictError::InvalidState {
                operation,
                state: current,
            }),
        }
    }

    /// Select the models to use.
    ///
    /// # Arguments
    /// * `persistent` - system and user models, queried and looked up
    /// * `auto_learn` - models learning from [`learn_text`](Self::learn_text)
    /// * `scratch` - in-memory models, queried after the persistent ones
    pub fn set_models<S: AsRef<str>>(
        &self,
        persistent: &[S],
        auto_learn: &[S],
        scratch: &[S],
    ) -> Result<(), PredictError> {
        let mut state = self.state.write();
        if *state == EngineState::Shutdown {
            return Err(PredictError::InvalidState {
                operation: "set_models",
                state: *state,
            });
        }

        let to_vec = |ids: &[S]| ids.iter().map(|s| s.as_ref().to_string()).collect::<Vec<_>>();
        let persistent = to_vec(persistent);
        let scratch = to_vec(scratch);
        let mut models = persistent.clone();
        models.extend(scratch.iter().cloned());

        *self.lists.write() = ModelLists {
            models,
            persistent,
            auto_learn: to_vec(auto_learn),
            scratch,
        };
        if *state == EngineState::Uninitialized {
            *state = EngineState::Configured;
        }
        Ok(())
    }

    /// Load all selected models now instead of on first use.
    pub fn load_models(&self) -> Result<(), PredictError> {
        let _serving = self.begin("load_models")?;
        let models = self.lists.read().models.clone();
        self.cache.get_models(&models);
        Ok(())
    }

    /// Completions for the partial word at the end of `context`.
    pub fn predict(
        &self,
        context: &str,
        limit: i32,
        options: PredictOptions,
    ) -> Result<Vec<String>, PredictError> {
        let _serving = self.begin("predict")?;

        let (tokens, _) = tokenizer::tokenize_context(context);
        let lmdesc = self.lists.read().models.clone();
        let (lmids, _weights) = parse_lmdesc(&lmdesc);
        let models = self.cache.get_models(&lmids);
        for model in &models {
            self.configure_model(model);
        }

        let composer = ModelComposer::overlay(models);
        let choices = composer.predictp(&tokens, limit, options);
        debug!("context={:?}", tokens);
        debug!("choices={:?}", &choices[..choices.len().min(5)]);

        Ok(choices.into_iter().map(|c| c.word).collect())
    }

    /// Absolute discounting and the configured recency parameters.
    fn configure_model(&self, model: &SharedModel) {
        if is_configured(&model.read(), &self.config) {
            return;
        }
        let mut model = model.write();
        if model.supports_smoothing(Smoothing::AbsDisc) {
            // can't fail, support was checked
            let _ = model.set_smoothing(Smoothing::AbsDisc);
        }
        if let Some(recency) = model.recency_mut() {
            recency.ratio = self.config.recency_ratio;
            recency.halflife = self.config.recency_halflife;
            recency.lambdas = self.config.recency_lambdas.clone();
        }
    }

    /// Learn `text` into the auto-learn models.
    pub fn learn_text(&self, text: &str, allow_new_words: bool) -> Result<(), PredictError> {
        let _serving = self.begin("learn_text")?;
        let auto_learn = self.lists.read().auto_learn.clone();
        if auto_learn.is_empty() {
            return Ok(());
        }

        let (tokens, _) = tokenizer::tokenize_text(text, false);
        // a trailing quote is more often closing a quotation than a word
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|token| match token.strip_suffix('\'') {
                Some("") => UNKNOWN.to_string(),
                Some(stripped) => stripped.to_string(),
                None => token,
            })
            .collect();

        for model in self.cache.get_models(&auto_learn) {
            model.write().learn_tokens(&tokens, allow_new_words);
        }
        info!("learn_text: tokens={:?}", &tokens[..tokens.len().min(10)]);
        Ok(())
    }

    /// Learn `text` into the scratch models, always adding new words.
    pub fn learn_scratch_text(&self, text: &str) -> Result<(), PredictError> {
        let _serving = self.begin("learn_scratch_text")?;
        let scratch = self.lists.read().scratch.clone();
        let (tokens, _) = tokenizer::tokenize_text(text, false);
        for model in self.cache.get_models(&scratch) {
            model.write().learn_tokens(&tokens, true);
        }
        Ok(())
    }

    pub fn clear_scratch_models(&self) -> Result<(), PredictError> {
        let _serving = self.begin("clear_scratch_models")?;
        let scratch = self.lists.read().scratch.clone();
        for model in self.cache.get_models(&scratch) {
            model.write().clear();
        }
        Ok(())
    }

    /// Tokens of `text` and, per token and selected model, `1` for an exact
    /// match, `-n` for `n` prefix matches or `0`.
    pub fn lookup_text(&self, text: &str) -> Result<(Vec<LookupToken>, Vec<Vec<i64>>), PredictError> {
        let _serving = self.begin("lookup_text")?;
        let lmids = self.lists.read().models.clone();

        let (tokens, spans) = tokenizer::tokenize_sentence(text, false);
        let tokens: Vec<LookupToken> = tokens
            .into_iter()
            .zip(spans)
            .map(|(token, (start, end))| LookupToken { start, end, token })
            .collect();

        let mut counts = vec![vec![0; lmids.len()]; tokens.len()];
        for (i, lmid) in lmids.iter().enumerate() {
            if let Some(model) = self.cache.get_model(lmid) {
                let model = model.read();
                for (j, token) in tokens.iter().enumerate() {
                    counts[j][i] = model.lookup_word(&token.token);
                }
            }
        }
        debug!("lookup_text: tokens={:?} counts={:?}", tokens, counts);
        Ok((tokens, counts))
    }

    /// True if a persistent model knows `word` exactly.
    pub fn word_exists(&self, word: &str) -> Result<bool, PredictError> {
        let _serving = self.begin("word_exists")?;
        let persistent = self.lists.read().persistent.clone();
        Ok(persistent
            .iter()
            .filter_map(|lmid| self.cache.get_model(lmid))
            .any(|model| model.read().lookup_word(word) > 0))
    }

    /// The text from the start of the last context token to the end,
    /// looking at the final `context_fragment_chars` characters only.
    pub fn get_last_context_fragment(&self, text: &str) -> Result<String, PredictError> {
        let _serving = self.begin("get_last_context_fragment")?;
        let max_chars = self.config.context_fragment_chars;
        let skip = text.chars().count().saturating_sub(max_chars);
        let start = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
        let fragment = &text[start..];

        let (_, spans) = tokenizer::tokenize_context(fragment);
        // not the token itself, it lacks trailing dashes
        Ok(spans
            .last()
            .map(|(begin, _)| fragment[*begin..].to_string())
            .unwrap_or_default())
    }

    pub fn tokenize_text(&self, text: &str) -> (Vec<String>, Vec<Span>) {
        tokenizer::tokenize_text(text, false)
    }

    pub fn tokenize_context(&self, text: &str) -> (Vec<String>, Vec<Span>) {
        tokenizer::tokenize_context(text)
    }

    /// Names of the available models of `class` (`"system"` or `"user"`).
    pub fn get_model_names(&self, class: &str) -> Result<Vec<String>, PredictError> {
        let _serving = self.begin("get_model_names")?;
        Ok(self.cache.find_available_model_names(class))
    }

    /// `(lmid, message)` of models that failed to load and won't be saved.
    pub fn load_errors(&self) -> Result<Vec<(String, String)>, PredictError> {
        let _serving = self.begin("load_errors")?;
        Ok(self.cache.load_errors())
    }

    /// See [`ModelCache::recover_model`].
    pub fn recover_model(&self, lmid: &str) -> Result<(), PredictError> {
        let _serving = self.begin("recover_model")?;
        self.cache.recover_model(lmid)?;
        Ok(())
    }

    /// Save all modified user models now.
    pub fn save_models(&self) -> Result<(), PredictError> {
        let _serving = self.begin("save_models")?;
        self.cache.save_models();
        Ok(())
    }

    /// Stop auto-saving, flush modified user models and shut down.
    ///
    /// Waits for operations in progress, so everything they learned is
    /// saved.
    pub fn cleanup(&self) -> Result<(), PredictError> {
        let mut state = self.state.write();
        if matches!(*state, EngineState::Uninitialized | EngineState::Shutdown) {
            return Err(PredictError::InvalidState {
                operation: "cleanup",
                state: *state,
            });
        }

        if let Some(mut autosave) = self.autosave.lock().take() {
            autosave.stop();
        }
        self.cache.save_models();
        *state = EngineState::Shutdown;
        info!("prediction engine shut down");
        Ok(())
    }
}

fn is_configured(model: &NGramModel, config: &Config) -> bool {
    let smoothing_ok = !model.supports_smoothing(Smoothing::AbsDisc)
        || model.smoothing() == Smoothing::AbsDisc;
    let recency_ok = model.recency().map_or(true, |r| {
        r.ratio == config.recency_ratio
            && r.halflife == config.recency_halflife
            && r.lambdas == config.recency_lambdas
    });
    smoothing_ok && recency_ok
}
