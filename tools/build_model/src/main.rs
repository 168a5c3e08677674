use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wordpredict_core::corpus::{self, TypingStats};
use wordpredict_core::{
    split_sentences, tokenize_text, ModelComposer, ModelKind, NGramModel, SharedModel,
    Smoothing,
};

/// Learn text corpora into a language model file.
#[derive(Parser)]
struct Opts {
    /// Corpus files, UTF-8 or Latin-1
    #[arg(required = true)]
    corpora: Vec<PathBuf>,

    /// Output `.lm` file
    #[arg(short, long)]
    output: PathBuf,

    /// unigram, dynamic, dynamic-kn or cached
    #[arg(long, default_value = "dynamic")]
    kind: ModelKind,

    #[arg(long, default_value_t = 3)]
    order: usize,

    /// witten-bell, abs-disc or kneser-ney
    #[arg(long)]
    smoothing: Option<Smoothing>,

    /// Only read this many lines of each corpus
    #[arg(long)]
    max_lines: Option<usize>,

    /// Restrict learning to the words of this file, one per line
    #[arg(long, conflicts_with = "max_words")]
    vocabulary: Option<PathBuf>,

    /// Restrict learning to the most frequent words of the corpora
    #[arg(long, default_value_t = 0)]
    max_words: usize,

    /// Words seen less often are left out of an extracted vocabulary
    #[arg(long, default_value_t = 1)]
    min_count: usize,

    /// Pruning thresholds per level, e.g. `0,1,-1`
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    prune: Vec<i64>,

    /// Report entropy and perplexity on this corpus
    #[arg(long)]
    test_corpus: Option<PathBuf>,

    /// Also simulate typing the test corpus and report keystroke savings
    #[arg(long, requires = "test_corpus")]
    ksr: bool,

    /// Number of choices offered while simulating typing
    #[arg(long, default_value_t = 10)]
    ksr_limit: i32,

    /// Learn each typed sentence into the model
    #[arg(long, requires = "ksr")]
    ksr_learn: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary {
    file: PathBuf,
    kind: String,
    order: usize,
    smoothing: String,
    ngrams: Vec<usize>,
    totals: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<Evaluation>,
}

#[derive(Serialize)]
struct Evaluation {
    words: usize,
    entropy: f64,
    perplexity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    typing: Option<Typing>,
}

#[derive(Serialize)]
struct Typing {
    sentences: usize,
    #[serde(flatten)]
    stats: TypingStats,
    ksr: f64,
}

fn read_tokens(path: &Path, max_lines: Option<usize>) -> Result<Vec<String>> {
    let text = corpus::read_corpus(path, max_lines)
        .with_context(|| format!("read corpus {}", path.display()))?;
    let (tokens, _) = tokenize_text(&text, false);
    info!("{}: {} tokens", path.display(), tokens.len());
    Ok(tokens)
}

fn simulate(model: SharedModel, path: &Path, opts: &Opts) -> Result<Typing> {
    let text = corpus::read_corpus(path, opts.max_lines)
        .with_context(|| format!("read corpus {}", path.display()))?;
    let (sentences, _) = split_sentences(&text, false);

    let composer = ModelComposer::overlay(vec![model.clone()]);
    let learn = opts.ksr_learn.then_some(&model);
    let stats = corpus::simulate_typing(&composer, learn, &sentences, opts.ksr_limit);
    info!("typed {} sentences: {:?}", sentences.len(), stats);

    Ok(Typing {
        sentences: sentences.len(),
        stats,
        ksr: stats.ksr(),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_target(false)
        .init();

    let opts = Opts::parse();
    if opts.order == 0 {
        bail!("order must be at least 1");
    }

    let mut tokens = Vec::new();
    for path in &opts.corpora {
        tokens.extend(read_tokens(path, opts.max_lines)?);
    }

    let vocabulary = if let Some(path) = &opts.vocabulary {
        Some(
            corpus::read_vocabulary(path)
                .with_context(|| format!("read vocabulary {}", path.display()))?,
        )
    } else if opts.max_words > 0 {
        let mut words: Vec<String> = corpus::extract_vocabulary(&tokens, opts.min_count, opts.max_words)
            .into_iter()
            .map(|(word, _)| word)
            .collect();
        for control in wordpredict_core::CONTROL_WORDS {
            if !words.iter().any(|w| w == control) {
                words.push(control.to_string());
            }
        }
        Some(words)
    } else {
        None
    };
    if let Some(vocabulary) = &vocabulary {
        info!("vocabulary of {} words", vocabulary.len());
        tokens = corpus::filter_tokens(&tokens, vocabulary);
    }

    let mut model = NGramModel::new(opts.kind, opts.order);
    if let Some(smoothing) = opts.smoothing {
        model.set_smoothing(smoothing)?;
    }
    model.learn_tokens(&tokens, true);
    if !opts.prune.is_empty() {
        model = model.prune(&opts.prune);
    }

    model
        .save(&opts.output)
        .with_context(|| format!("write {}", opts.output.display()))?;

    let (ngrams, totals) = model.get_counts();
    let mut summary = Summary {
        file: opts.output.clone(),
        kind: model.kind().to_string(),
        order: model.order(),
        smoothing: model.smoothing().to_string(),
        ngrams,
        totals,
        evaluation: None,
    };

    summary.evaluation = match &opts.test_corpus {
        Some(path) => {
            let mut test_tokens = read_tokens(path, opts.max_lines)?;
            if let Some(vocabulary) = &vocabulary {
                test_tokens = corpus::filter_tokens(&test_tokens, vocabulary);
            }
            let (entropy, perplexity) = corpus::entropy(&model, &test_tokens);
            let typing = if opts.ksr {
                // the model is saved already, learning only affects typing
                Some(simulate(Arc::new(RwLock::new(model)), path, &opts)?)
            } else {
                None
            };
            Some(Evaluation {
                words: test_tokens.len(),
                entropy,
                perplexity,
                typing,
            })
        }
        None => None,
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!(
        "{}: {} model, order {}, {}",
        summary.file.display(),
        summary.kind,
        summary.order,
        summary.smoothing
    );
    for (i, (ngrams, total)) in summary.ngrams.iter().zip(&summary.totals).enumerate() {
        println!("  {}-grams: {} distinct, {} total", i + 1, ngrams, total);
    }
    if let Some(eval) = &summary.evaluation {
        println!(
            "  test: {} words, entropy {:.4} bits/word, perplexity {:.2}",
            eval.words, eval.entropy, eval.perplexity
        );
        if let Some(typing) = &eval.typing {
            println!(
                "  typing: {} sentences, {} of {} keys pressed, ksr {:.2}%",
                typing.sentences, typing.stats.pressed_keys, typing.stats.total_chars, typing.ksr
            );
        }
    }
}
