//! Sentence splitting and word tokenization.
//!
//! Two grammars share one scanner:
//! - the text grammar, used when learning, keeps words, numbers and a few
//!   control tokens;
//! - the context grammar, used for live prediction, additionally keeps a
//!   trailing `-` on words and recognizes standalone `-`/`--` so command line
//!   options complete.
//!
//! Every token carries a half-open byte span into the input text. Inserted
//! tokens (`<s>` between sentences, the empty completion token at the end of
//! a context) carry empty spans.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dictionary::{NUMBER, SENTENCE_BEGIN, UNKNOWN};

/// Half-open byte range `[start, end)` into the tokenized text.
pub type Span = (usize, usize);

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-+]?\d+(?:[.,]\d+)*|[.,]\d+)").expect("number pattern is valid")
});

static TEXT_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:-{0,2}[^\W\d]\w*(?:[-'´΄]\w+)*['´΄]?|<unk>|<s>|</s>|<num>|<bot:[a-z]*>)")
        .expect("word pattern is valid")
});

static CONTEXT_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:-{0,2}[^\W\d]\w*(?:[-'´΄]\w+)*[-'´΄]?|<unk>|<s>|</s>|<num>|<bot:[a-z]*>)")
        .expect("context word pattern is valid")
});

// user:password@ part of URLs
static URL_PASSWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:[^\s:@]+@").expect("password pattern is valid"));

// a single trailing newline still counts as the end
static CONTEXT_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-'´΄\w]\n?\z").expect("context end pattern is valid"));

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.;:!?]"?\n?\z"#).expect("sentence end pattern is valid"));

/// Minimum run of one repeated character that marks a chunk as garbage.
const GARBAGE_REPEAT: usize = 4;

/// Split `text` into sentence fragments with their byte spans.
///
/// With `disambiguate`, fragments that do not end in sentence punctuation get
/// ` <s>` appended so a following tokenizer still sees the boundary.
pub fn split_sentences(text: &str, disambiguate: bool) -> (Vec<String>, Vec<Span>) {
    let filtered = text.replace('\r', " ");
    let mut sentences = Vec::new();
    let mut spans = Vec::new();

    let mut start = 0;
    while start < filtered.len() {
        let end = filtered[start..]
            .char_indices()
            .find_map(|(i, _)| sentence_end_at(&filtered, start + i))
            .unwrap_or(filtered.len());

        let (sentence, span) = clean_fragment(&filtered, start, end);
        let sentence = if disambiguate && !SENTENCE_END_RE.is_match(&sentence) {
            sentence + " " + SENTENCE_BEGIN
        } else {
            sentence
        };
        sentences.push(sentence);
        spans.push(span);
        start = end;
    }

    (sentences, spans)
}

/// End offset of a fragment whose terminator starts at `pos`, if any.
fn sentence_end_at(text: &str, pos: usize) -> Option<usize> {
    let rest = &text[pos..];
    let mut chars = rest.chars();
    let c = chars.next()?;

    if matches!(c, '.' | ';' | ':' | '!' | '?') {
        match chars.next() {
            Some('"') => return Some(pos + 2),
            Some(next) if next.is_whitespace() => return Some(pos + 1),
            _ => {}
        }
    }

    if c.is_whitespace() {
        let mut newlines = 0;
        let mut last_newline = 0;
        for (i, ch) in rest.char_indices() {
            if !ch.is_whitespace() {
                break;
            }
            if ch == '\n' {
                newlines += 1;
                last_newline = pos + i;
            }
        }
        if newlines >= 2 {
            return Some(last_newline);
        }
    }

    if rest.starts_with(SENTENCE_BEGIN) {
        return Some(pos + SENTENCE_BEGIN.len());
    }
    None
}

/// Trim a raw fragment, blank out explicit `<s>` and trim again, keeping the
/// span aligned with the remaining text.
fn clean_fragment(text: &str, mut begin: usize, mut end: usize) -> (String, Span) {
    let raw = &text[begin..end];
    let trimmed = raw.trim_start();
    begin += raw.len() - trimmed.len();
    let trimmed_both = trimmed.trim_end();
    end = begin + trimmed_both.len();

    let blanked = trimmed_both.replace(SENTENCE_BEGIN, "   ");
    let right = blanked.trim_end();
    end -= blanked.len() - right.len();
    let both = right.trim_start();
    begin += right.len() - both.len();

    (both.to_string(), (begin, end))
}

/// Tokenize a single sentence with the text or the context grammar.
pub fn tokenize_sentence(sentence: &str, is_context: bool) -> (Vec<String>, Vec<Span>) {
    let mut tokens = Vec::new();
    let mut spans = Vec::new();

    let mut pos = 0;
    while pos < sentence.len() {
        match match_token(sentence, pos, is_context) {
            Some((end, token)) => {
                tokens.push(token);
                spans.push((pos, end));
                pos = end;
            }
            None => {
                pos += sentence[pos..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    (tokens, spans)
}

/// Try the grammar rules in priority order at `pos`.
fn match_token(s: &str, pos: usize, is_context: bool) -> Option<(usize, String)> {
    let rest = &s[pos..];

    if let Some(end) = match_garbage(s, pos) {
        return Some((end, UNKNOWN.to_string()));
    }

    if let Some(m) = NUMBER_RE.find(rest) {
        return Some((pos + m.end(), NUMBER.to_string()));
    }

    let word_re = if is_context {
        &CONTEXT_WORD_RE
    } else {
        &TEXT_WORD_RE
    };
    if let Some(m) = word_re.find(rest) {
        return Some((pos + m.end(), m.as_str().to_string()));
    }

    match_operator(s, pos, is_context).map(|end| (end, s[pos..end].to_string()))
}

fn match_garbage(s: &str, pos: usize) -> Option<usize> {
    let rest = &s[pos..];

    if at_word_start(s, pos) {
        let chunk_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if chunk_len > 0 && has_repeat_run(&rest[..chunk_len]) {
            return Some(pos + chunk_len);
        }
    }

    if rest.starts_with("---") && at_word_end(s, pos + 3) {
        return Some(pos + 3);
    }

    URL_PASSWORD_RE.find(rest).map(|m| pos + m.end())
}

/// Standalone `|`, plus `--` and `-` in context mode.
fn match_operator(s: &str, pos: usize, is_context: bool) -> Option<usize> {
    if !at_word_start(s, pos) {
        return None;
    }
    let candidates: &[&str] = if is_context {
        &["|", "--", "-"]
    } else {
        &["|"]
    };
    candidates
        .iter()
        .find(|op| s[pos..].starts_with(**op) && at_word_end(s, pos + op.len()))
        .map(|op| pos + op.len())
}

fn at_word_start(s: &str, pos: usize) -> bool {
    s[..pos].chars().next_back().map_or(true, char::is_whitespace)
}

fn at_word_end(s: &str, pos: usize) -> bool {
    s[pos..].chars().next().map_or(true, char::is_whitespace)
}

fn has_repeat_run(chunk: &str) -> bool {
    let mut prev = None;
    let mut run = 0;
    for c in chunk.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= GARBAGE_REPEAT {
            return true;
        }
    }
    false
}

/// Split into sentences and tokenize each; sentences after the first are
/// introduced by a `<s>` token with an empty span.
pub fn tokenize_text(text: &str, is_context: bool) -> (Vec<String>, Vec<Span>) {
    let (sentences, sentence_spans) = split_sentences(text, false);

    let mut tokens = Vec::new();
    let mut spans = Vec::new();
    for (i, (sentence, (begin, _))) in sentences.iter().zip(sentence_spans).enumerate() {
        if i > 0 {
            tokens.push(SENTENCE_BEGIN.to_string());
            spans.push((begin, begin));
        }
        let (words, word_spans) = tokenize_sentence(sentence, is_context);
        tokens.extend(words);
        spans.extend(word_spans.into_iter().map(|(s, e)| (s + begin, e + begin)));
    }

    (tokens, spans)
}

/// Tokenize the text before the cursor.
///
/// Unless the text ends inside a word (or on a standalone pipe, or a garbage
/// run), an empty token is appended: the word about to be typed.
pub fn tokenize_context(text: &str) -> (Vec<String>, Vec<Span>) {
    let (mut tokens, mut spans) = tokenize_text(text, true);
    if !ends_in_word(text) {
        tokens.push(String::new());
        spans.push((text.len(), text.len()));
    }
    (tokens, spans)
}

fn ends_in_word(text: &str) -> bool {
    if text.is_empty() || CONTEXT_END_RE.is_match(text) {
        return true;
    }

    let before_pipe = text
        .strip_suffix("|=")
        .or_else(|| text.strip_suffix('|'));
    if let Some(before) = before_pipe {
        if before.chars().next_back().map_or(true, char::is_whitespace) {
            return true;
        }
    }

    let mut rev = text.chars().rev();
    match rev.next() {
        Some(last) if !last.is_whitespace() => {
            rev.take_while(|c| *c == last).count() + 1 >= GARBAGE_REPEAT
        }
        _ => false,
    }
}

/// Split a token stream at `separator`.
///
/// Empty sections are dropped. With `keep_separator`, each section after a
/// separator starts with it, and a final section holding only the separator
/// is dropped.
///
/// # Examples
///
/// ```
/// use wordpredict_core::tokenizer::split_tokens;
///
/// let tokens = ["word1", "<unk>", "word2", "word3", "<unk>"];
/// assert_eq!(
///     split_tokens(&tokens, "<unk>", false),
///     vec![vec!["word1"], vec!["word2", "word3"]]
/// );
/// assert_eq!(
///     split_tokens(&tokens, "<unk>", true),
///     vec![vec!["word1"], vec!["<unk>", "word2", "word3"]]
/// );
/// ```
pub fn split_tokens<'t, S: AsRef<str>>(
    tokens: &'t [S],
    separator: &str,
    keep_separator: bool,
) -> Vec<Vec<&'t str>> {
    split_sections(tokens.iter().map(AsRef::as_ref), separator, keep_separator)
}

/// `split_tokens` over borrowed tokens, keeping their original lifetime.
pub(crate) fn split_sections<'t>(
    tokens: impl IntoIterator<Item = &'t str>,
    separator: &str,
    keep_separator: bool,
) -> Vec<Vec<&'t str>> {
    let mut sections = Vec::new();
    let mut section: Vec<&'t str> = Vec::new();

    for token in tokens {
        if token == separator {
            if !section.is_empty() {
                sections.push(std::mem::take(&mut section));
            }
            if keep_separator {
                section.push(token);
            }
        } else {
            section.push(token);
        }
    }

    if section.len() > 1 || section.first().map_or(false, |t| *t != separator) {
        sections.push(section);
    }
    sections
}
