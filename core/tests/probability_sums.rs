// core/tests/probability_sums.rs
//
// Normalized prediction distributions over a trained model.
//
// Tests cover:
// - orders 1..=5 for every model kind and supported smoothing
// - overlay, linear and log-linear composition
// - pruned models keep summing to one
// - pruning is monotone in the threshold

use std::sync::Arc;

use parking_lot::RwLock;
use wordpredict_core::{
    tokenize_text, ModelComposer, NGramModel, PredictOptions, PredictionChoice, SharedModel,
    Smoothing,
};

const TRAINING_TEXT: &str = "
    No, when I go to sea, I go as a simple sailor, right before the mast,
    plumb down into the forecastle, aloft there to the royal mast-head.
    True, they rather order me about some, and make me jump from spar to
    spar, like a grasshopper in a May meadow. And at first, this sort
    of thing is unpleasant enough. And more than all,
    if just previous to putting your hand into the tar-pot, you have been
    lording it as a country schoolmaster, making the tallest boys stand
    in awe of you.
";

const TESTING_TEXT: &str = "
    I now took the measure of the bench, and found that it was a foot too
    short; but that could be mended with a chair. I then placed the
    first bench lengthwise along the only clear space against the wall,
    leaving a little interval between, for my back to settle down in.
";

const EPSILON: f64 = 1e-6;

fn training_tokens() -> Vec<String> {
    tokenize_text(TRAINING_TEXT, false).0
}

fn testing_tokens() -> Vec<String> {
    tokenize_text(TESTING_TEXT, false).0
}

fn options() -> PredictOptions {
    PredictOptions::NORMALIZE | PredictOptions::INCLUDE_CONTROL_WORDS
}

fn assert_sums_to_one<F>(label: &str, predictp: F)
where
    F: Fn(&[String]) -> Vec<PredictionChoice>,
{
    let tokens = testing_tokens();
    for i in 0..tokens.len() {
        let mut context = tokens[..i].to_vec();
        context.push(String::new());

        let choices = predictp(&context);
        let sum: f64 = choices.iter().map(|c| c.p).sum();
        assert!(
            (sum - 1.0).abs() < EPSILON,
            "{label}, position {i}: sum {sum} over {} choices",
            choices.len()
        );
        assert!(
            choices.iter().all(|c| c.p > 0.0),
            "{label}, position {i}: zero probability"
        );
    }
}

fn trained(mut model: NGramModel, smoothing: Smoothing) -> NGramModel {
    if model.supports_smoothing(smoothing) {
        model.set_smoothing(smoothing).unwrap();
    }
    model.learn_tokens(&training_tokens(), true);
    model
}

fn shared(model: NGramModel) -> SharedModel {
    Arc::new(RwLock::new(model))
}

#[test]
fn unigram_model() {
    let model = trained(NGramModel::unigram(), Smoothing::AbsDisc);
    assert_sums_to_one("unigram", |c| model.predictp(c, -1, options()));
}

#[test]
fn dynamic_models() {
    for order in 1..=5 {
        for smoothing in [Smoothing::WittenBell, Smoothing::AbsDisc] {
            let model = trained(NGramModel::dynamic(order), smoothing);
            assert_sums_to_one(&format!("dynamic {order} {smoothing}"), |c| {
                model.predictp(c, -1, options())
            });
        }
    }
}

#[test]
fn kneser_ney_models() {
    for order in 1..=5 {
        for smoothing in [Smoothing::KneserNey, Smoothing::AbsDisc] {
            let model = trained(NGramModel::dynamic_kn(order), smoothing);
            assert_sums_to_one(&format!("kn {order} {smoothing}"), |c| {
                model.predictp(c, -1, options())
            });
        }
    }
}

#[test]
fn cached_models() {
    for order in 1..=5 {
        let model = trained(NGramModel::cached(order), Smoothing::AbsDisc);
        assert_sums_to_one(&format!("cached {order}"), |c| model.predictp(c, -1, options()));
    }
}

#[test]
fn unnormalized_abs_disc_sums_to_one() {
    // the smoothed distribution is proper on its own
    for order in 2..=4 {
        let model = trained(NGramModel::dynamic(order), Smoothing::AbsDisc);
        let tokens = testing_tokens();
        let mut context = tokens[..6].to_vec();
        context.push(String::new());
        let sum: f64 = model
            .predictp(&context, -1, PredictOptions::INCLUDE_CONTROL_WORDS)
            .iter()
            .map(|c| c.p)
            .sum();
        assert!((sum - 1.0).abs() < EPSILON, "order {order}: {sum}");
    }
}

#[test]
fn composed_models() {
    for order in 2..=4 {
        let model = shared(trained(NGramModel::dynamic(order), Smoothing::AbsDisc));
        let composers = [
            ("overlay", ModelComposer::overlay(vec![model.clone(), model.clone()])),
            (
                "linint",
                ModelComposer::linint(vec![model.clone(), model.clone()], vec![0.3, 0.7]),
            ),
            (
                "loglinint",
                ModelComposer::loglinint(vec![model.clone(), model.clone()], vec![1.0, 2.0]),
            ),
        ];
        for (name, composer) in &composers {
            assert_sums_to_one(&format!("{name} {order}"), |c| {
                composer.predictp(c, -1, options())
            });
        }
    }
}

#[test]
fn pruned_models() {
    for order in 2..=4 {
        for smoothing in [Smoothing::WittenBell, Smoothing::AbsDisc] {
            let model = trained(NGramModel::dynamic(order), smoothing);
            for threshold in 0..5 {
                let pruned = model.prune(&[threshold]);
                assert_eq!(pruned.smoothing(), smoothing);
                assert_sums_to_one(&format!("pruned {order} {threshold}"), |c| {
                    pruned.predictp(c, -1, options())
                });
            }
        }
    }
}

#[test]
fn pruning_is_monotone() {
    let model = trained(NGramModel::dynamic(3), Smoothing::AbsDisc);
    let mut previous = model.get_counts().0;

    for threshold in 0..5 {
        let (types, _) = model.prune(&[threshold]).get_counts();
        for (level, (now, before)) in types.iter().zip(&previous).enumerate() {
            assert!(now <= before, "level {}, threshold {threshold}", level + 1);
        }
        previous = types;
    }
}

#[test]
fn trailing_drop_levels_shrink_the_order() {
    let model = trained(NGramModel::dynamic(4), Smoothing::AbsDisc);
    assert_eq!(model.prune(&[0, 0, -1, -1]).order(), 2);
    assert_eq!(model.prune(&[0, -1, 0]).order(), 4);
    assert_eq!(model.prune(&[-1]).order(), 3);

    // a dropped level takes the longer ones with it
    let (types, _) = model.prune(&[0, -1, 0]).get_counts();
    assert!(types[0] > 0);
    assert_eq!(&types[1..], &[0, 0, 0]);
}
