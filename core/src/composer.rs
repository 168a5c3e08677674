//! Combining several models into one prediction source.
use ahash::AHashMap;

use crate::cache::SharedModel;
use crate::ngram::{probability_from, rank_choices, PredictionChoice};
use crate::options::PredictOptions;

/// How component results are merged.
#[derive(Debug, Clone, PartialEq)]
pub enum Composition {
    /// First model with a non-empty result wins.
    Overlay,
    /// Weighted arithmetic mean of the components' distributions.
    Linint { weights: Vec<f64> },
    /// Weighted product `Π p^w` of the components' probabilities.
    Loglinint { weights: Vec<f64> },
}

/// A virtual model merging the predictions of its components.
///
/// Components are read-locked one at a time while querying.
pub struct ModelComposer {
    models: Vec<SharedModel>,
    composition: Composition,
}

impl ModelComposer {
    pub fn overlay(models: Vec<SharedModel>) -> Self {
        Self {
            models,
            composition: Composition::Overlay,
        }
    }

    /// Missing weights default to 1.0.
    pub fn linint(models: Vec<SharedModel>, weights: Vec<f64>) -> Self {
        let weights = pad_weights(weights, models.len());
        Self {
            models,
            composition: Composition::Linint { weights },
        }
    }

    /// Missing weights default to 1.0.
    pub fn loglinint(models: Vec<SharedModel>, weights: Vec<f64>) -> Self {
        let weights = pad_weights(weights, models.len());
        Self {
            models,
            composition: Composition::Loglinint { weights },
        }
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    pub fn models(&self) -> &[SharedModel] {
        &self.models
    }

    pub fn predictp<S: AsRef<str>>(
        &self,
        context: &[S],
        limit: i32,
        options: PredictOptions,
    ) -> Vec<PredictionChoice> {
        // components always answer with their full, normalized distribution
        let component_options = options | PredictOptions::NORMALIZE | PredictOptions::NO_SORT;
        let query = |model: &SharedModel| model.read().predictp(context, -1, component_options);

        let merged: Vec<PredictionChoice> = match &self.composition {
            Composition::Overlay => self
                .models
                .iter()
                .map(query)
                .find(|choices| !choices.is_empty())
                .unwrap_or_default(),
            Composition::Linint { weights } => {
                let weight_sum: f64 = weights.iter().sum();
                let mut merged = MergeMap::default();
                for (model, weight) in self.models.iter().zip(weights) {
                    let w = if weight_sum > 0.0 { weight / weight_sum } else { 0.0 };
                    for choice in query(model) {
                        *merged.entry(choice.word, 0.0) += w * choice.p;
                    }
                }
                merged.into_choices()
            }
            Composition::Loglinint { weights } => {
                let mut merged = MergeMap::default();
                for (model, weight) in self.models.iter().zip(weights) {
                    for choice in query(model) {
                        *merged.entry(choice.word, 1.0) *= choice.p.powf(*weight);
                    }
                }
                merged.into_choices()
            }
        };

        let mut merged = merged;
        // equal probabilities end up in word order
        merged.sort_by(|a, b| a.word.cmp(&b.word));
        rank_choices(merged, limit, options)
    }

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

    /// Probability of the last word of `ngram` following the words before it.
    pub fn get_probability<S: AsRef<str>>(&self, ngram: &[S]) -> f64 {
        if let Composition::Linint { weights } = &self.composition {
            let weight_sum: f64 = weights.iter().sum();
            if weight_sum <= 0.0 {
                return 0.0;
            }
            return self
                .models
                .iter()
                .zip(weights)
                .map(|(model, weight)| weight / weight_sum * model.read().get_probability(ngram))
                .sum();
        }
        probability_from(ngram, |context| {
            self.predictp(
                context,
                -1,
                PredictOptions::NORMALIZE | PredictOptions::INCLUDE_CONTROL_WORDS,
            )
        })
    }
}

/// Word -> merged probability, remembering first-seen order.
#[derive(Default)]
struct MergeMap {
    index: AHashMap<String, usize>,
    choices: Vec<PredictionChoice>,
}

impl MergeMap {
    fn entry(&mut self, word: String, initial: f64) -> &mut f64 {
        let i = match self.index.get(&word) {
            Some(i) => *i,
            None => {
                let i = self.choices.len();
                self.index.insert(word.clone(), i);
                self.choices.push(PredictionChoice { word, p: initial });
                i
            }
        };
        &mut self.choices[i].p
    }

    fn into_choices(self) -> Vec<PredictionChoice> {
        self.choices
    }
}

fn pad_weights(mut weights: Vec<f64>, n: usize) -> Vec<f64> {
    if weights.len() < n {
        weights.resize(n, 1.0);
    }
    weights
}

/// Split model descriptions `type:class:name[,weight]` into ids and weights.
///
/// A missing or malformed weight is 1.0.
///
/// # Example
/// ```
/// use wordpredict_core::parse_lmdesc;
///
/// let (ids, weights) = parse_lmdesc(&["lm:user:en,0.7", "lm:system:en", "lm:mem:x,abc"]);
/// assert_eq!(ids, vec!["lm:user:en", "lm:system:en", "lm:mem:x"]);
/// assert_eq!(weights, vec![0.7, 1.0, 1.0]);
/// ```
pub fn parse_lmdesc<S: AsRef<str>>(descs: &[S]) -> (Vec<String>, Vec<f64>) {
    descs
        .iter()
        .map(|desc| {
            let mut fields = desc.as_ref().split(',');
            let lmid = fields.next().unwrap_or("").trim().to_string();
            let weight = fields
                .next()
                .and_then(|w| w.trim().parse::<f64>().ok())
                .unwrap_or(1.0);
            (lmid, weight)
        })
        .unzip()
}
