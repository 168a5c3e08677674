//! ARPA-like `.lm` text format holding counts instead of log probabilities.
//!
//! ```text
//!
//! \data\
//! ngram 1=5
//! ngram 2=1
//!
//! \1-grams:
//! 1 <unk>
//! 1 <s>
//! 1 </s>
//! 1 <num>
//! 2 whale
//!
//! \2-grams:
//! 1 white whale
//!
//! \end\
//! ```
//!
//! Recency tracking models write the time of last use as a second column
//! (`count time w1 … wk`); every model accepts it on load. A trailing
//! backoff value after the words is accepted and ignored.
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::LoadError;
use crate::ngram::NGramModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Begin,
    Counts,
    NGramsHead,
    NGrams,
    Done,
}

impl NGramModel {
    /// Replace the model's contents with the file at `path`.
    ///
    /// On error the model is left empty.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let result = self.load_from_reader(BufReader::new(file));
        match &result {
            Ok(()) => debug!(
                "loaded {} model of order {} from {}",
                self.kind(),
                self.order(),
                path.display()
            ),
            Err(e) => warn!("failed to load {}: {}", path.display(), e),
        }
        result
    }

    /// Replace the model's contents with `.lm` data read from `reader`.
    pub fn load_from_reader<R: BufRead>(&mut self, reader: R) -> Result<(), LoadError> {
        let result = self.read_sections(reader);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn read_sections<R: BufRead>(&mut self, mut reader: R) -> Result<(), LoadError> {
        self.clear();

        let mut section = Section::Begin;
        let mut declared: Vec<usize> = Vec::new();
        let mut new_order = 0;
        let mut level = 0;
        let mut line_number = 0;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_number += 1;
            let line = decode_line(&buf);
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(first) = tokens.first() else {
                continue;
            };

            if section == Section::NGrams {
                if first.starts_with('\\') {
                    let expected = declared.get(level - 1).copied().unwrap_or(0);
                    let read = self.num_ngrams(level);
                    if read != expected {
                        return Err(LoadError::CountMismatch {
                            level,
                            expected,
                            read,
                        });
                    }
                    // the same line may open the next section
                    section = Section::NGramsHead;
                } else {
                    self.read_ngram_line(&tokens, level, line_number)?;
                    continue;
                }
            } else if section == Section::Begin {
                if first.starts_with("\\data\\") {
                    section = Section::Counts;
                }
            } else if section == Section::Counts {
                if *first == "ngram" && tokens.len() >= 2 {
                    if let Some((k, count)) = parse_ngram_count(tokens[1]) {
                        new_order = new_order.max(k);
                        declared.resize(new_order, 0);
                        declared[k - 1] = count;
                    }
                } else {
                    if let Some(max) = self.kind().max_order() {
                        if max < new_order {
                            return Err(LoadError::UnsupportedOrder {
                                found: new_order,
                                max,
                            });
                        }
                    }
                    if new_order > 0 {
                        self.set_order(new_order);
                    }
                    section = Section::NGramsHead;
                }
            }

            if section == Section::NGramsHead {
                if let Some(k) = parse_section_head(first) {
                    if k < 1 || k > new_order {
                        return Err(LoadError::UnexpectedOrder {
                            level: k,
                            line: line_number,
                        });
                    }
                    level = k;
                    section = Section::NGrams;
                } else if first.starts_with("\\end\\") {
                    section = Section::Done;
                    break;
                }
            }
        }

        if section != Section::Done {
            return Err(LoadError::UnexpectedEof);
        }

        if self.recency().is_some() {
            self.current_time = self.max_node_time();
        }
        Ok(())
    }

    fn read_ngram_line(&mut self, tokens: &[&str], level: usize, line: usize) -> Result<(), LoadError> {
        if tokens.len() < level + 1 {
            return Err(LoadError::TooFewTokens {
                level,
                line,
                found: tokens.len(),
                expected: level + 1,
            });
        }

        let count = parse_number(tokens[0], line)?;
        let layout = LineLayout::detect(tokens, level).ok_or_else(|| {
            let value = if parse_number(tokens[1], line).is_ok() {
                tokens[tokens.len() - 1]
            } else {
                tokens[1]
            };
            LoadError::BadNumber {
                line,
                value: value.to_string(),
            }
        })?;
        let time = if layout.time {
            Some(parse_number(tokens[1], line)?)
        } else {
            None
        };
        let words = &tokens[layout.first_word()..layout.first_word() + level];

        let wids: Vec<_> = words.iter().map(|w| self.dictionary.add_word(w)).collect();
        // unigrams replace the control word counts set up by `clear`
        let current = if level == 1 {
            self.trie.get_node(&wids).map_or(0, |n| self.trie.node(n).count)
        } else {
            0
        };
        self.count_ngram_ids(&wids, i64::from(count) - i64::from(current));

        if let Some(time) = time {
            let node = self.trie.add_node(&wids);
            self.trie.node_mut(node).time = time;
        }
        Ok(())
    }

    /// Number of n-grams of length `level` with a non-zero count.
    pub(crate) fn num_ngrams(&self, level: usize) -> usize {
        self.trie
            .nodes_at_depth(level)
            .into_iter()
            .filter(|(_, node)| self.trie.node(*node).count > 0)
            .count()
    }

    fn max_node_time(&self) -> u32 {
        (1..=self.order())
            .flat_map(|level| self.trie.nodes_at_depth(level))
            .map(|(_, node)| self.trie.node(node).time)
            .max()
            .unwrap_or(0)
    }

    /// Write the model to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.write_lm(&mut writer)?;
        writer.flush()
    }

    /// Serialize the model in `.lm` format.
    pub fn write_lm<W: Write>(&self, mut w: W) -> io::Result<()> {
        let (types, _) = self.get_counts();

        writeln!(w)?;
        writeln!(w, "\\data\\")?;
        for (i, n) in types.iter().enumerate() {
            writeln!(w, "ngram {}={}", i + 1, n)?;
        }

        for level in 1..=self.order() {
            writeln!(w)?;
            writeln!(w, "\\{level}-grams:")?;
            for entry in self.level_entries(level) {
                match entry.time {
                    Some(time) => write!(w, "{} {}", entry.count, time)?,
                    None => write!(w, "{}", entry.count)?,
                }
                for word in &entry.ngram {
                    write!(w, " {word}")?;
                }
                writeln!(w)?;
            }
        }

        writeln!(w)?;
        writeln!(w, "\\end\\")?;
        Ok(())
    }

    /// The model as `.lm` text.
    pub fn to_lm_string(&self) -> String {
        let mut buf = Vec::new();
        // writing to a Vec can't fail
        let _ = self.write_lm(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Highest order declared in the header of the `.lm` file at `path`.
///
/// Only the first lines are inspected. `None` if the file can't be read or
/// has no `ngram k=N` entries.
pub fn read_order(path: impl AsRef<Path>) -> Option<usize> {
    let file = File::open(path.as_ref()).ok()?;
    let mut reader = BufReader::new(file);
    let mut order = None;
    let mut in_data = false;
    let mut buf = Vec::new();

    for _ in 0..20 {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = decode_line(&buf);
        let line = line.trim_end();

        if line.starts_with("\\data\\") {
            in_data = true;
            continue;
        }
        if in_data {
            if let Some((k, _)) = line
                .strip_prefix("ngram ")
                .and_then(|rest| parse_ngram_count(rest.trim()))
            {
                order = Some(order.map_or(k, |o: usize| o.max(k)));
            }
            if line.starts_with('\\') {
                break;
            }
        }
    }
    order
}

/// UTF-8, falling back to Latin-1 for lines that aren't valid UTF-8.
pub(crate) fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|b| char::from(*b)).collect(),
    }
}

/// `"2=17"` -> `(2, 17)`
pub(crate) fn parse_ngram_count(s: &str) -> Option<(usize, usize)> {
    let (level, count) = s.split_once('=')?;
    let level: usize = level.trim().parse().ok()?;
    let count: usize = count.trim().parse().ok()?;
    (level >= 1).then_some((level, count))
}

/// `"\3-grams:"` -> `3`
pub(crate) fn parse_section_head(s: &str) -> Option<usize> {
    let rest = s.strip_prefix('\\')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with("-grams") {
        return None;
    }
    digits.parse().ok()
}

/// Optional columns of an n-gram line, `count [time] w1 … wk [backoff]`.
///
/// Words are never purely numeric, so a number right after the count is a
/// time and a number after the words is a backoff value, which is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineLayout {
    pub time: bool,
    pub backoff: bool,
}

impl LineLayout {
    pub(crate) fn detect(tokens: &[&str], level: usize) -> Option<Self> {
        let is_time = |s: &str| s.parse::<u32>().is_ok();
        let is_backoff = |s: &str| s.parse::<f64>().is_ok();
        let last = tokens.len().checked_sub(1)?;

        let (time, backoff) = match tokens.len().checked_sub(level + 1)? {
            0 => (false, false),
            1 if is_time(tokens[1]) => (true, false),
            1 if is_backoff(tokens[last]) => (false, true),
            2 if is_time(tokens[1]) && is_backoff(tokens[last]) => (true, true),
            _ => return None,
        };
        Some(Self { time, backoff })
    }

    pub(crate) fn first_word(self) -> usize {
        if self.time {
            2
        } else {
            1
        }
    }

    /// Number of fields for n-grams of `level`.
    pub(crate) fn fields(self, level: usize) -> usize {
        level + 1 + usize::from(self.time) + usize::from(self.backoff)
    }
}

fn parse_number(s: &str, line: usize) -> Result<u32, LoadError> {
    s.parse().map_err(|_| LoadError::BadNumber {
        line,
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ngram::ModelKind;

    const TRIGRAM_LM: &str = "
\\data\\
ngram 1=6
ngram 2=2
ngram 3=1

\\1-grams:
1 <unk>
1 <s>
1 </s>
1 <num>
3 white
2 whale

\\2-grams:
2 white whale
1 whale white

\\3-grams:
1 white whale white

\\end\\
";

    #[test]
    fn header_parsers() {
        assert_eq!(parse_ngram_count("2=17"), Some((2, 17)));
        assert_eq!(parse_ngram_count("0=1"), None);
        assert_eq!(parse_section_head("\\3-grams:"), Some(3));
        assert_eq!(parse_section_head("\\end\\"), None);
    }

    #[test]
    fn load_counts_and_order() {
        let mut model = NGramModel::dynamic(2);
        model.load_from_reader(TRIGRAM_LM.as_bytes()).unwrap();
        assert_eq!(model.order(), 3);
        assert_eq!(model.get_ngram_count(&["white"]), 3);
        assert_eq!(model.get_ngram_count(&["<s>"]), 1);
        assert_eq!(model.get_ngram_count(&["white", "whale", "white"]), 1);
        assert_eq!(model.get_counts().0, vec![6, 2, 1]);
    }

    #[test]
    fn save_then_load_is_identical() {
        let mut model = NGramModel::cached(3);
        model.learn_tokens(&["call", "me", "ishmael", "<s>", "call"], true);
        let text = model.to_lm_string();

        let mut loaded = NGramModel::cached(2);
        loaded.load_from_reader(text.as_bytes()).unwrap();
        assert_eq!(loaded.to_lm_string(), text);
        assert_eq!(loaded.current_time, model.current_time);
    }

    #[test]
    fn unigram_rejects_higher_orders() {
        let mut model = NGramModel::new(ModelKind::Unigram, 1);
        let err = model.load_from_reader(TRIGRAM_LM.as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedOrder { found: 3, max: 1 }));
        assert_eq!(model.get_counts().0, vec![4]);
    }

    #[test]
    fn malformed_files() {
        let mut model = NGramModel::dynamic(2);

        let truncated = TRIGRAM_LM.replace("\\end\\", "");
        assert!(matches!(
            model.load_from_reader(truncated.as_bytes()),
            Err(LoadError::UnexpectedEof)
        ));

        let short = TRIGRAM_LM.replace("2 white whale", "2 white");
        assert!(matches!(
            model.load_from_reader(short.as_bytes()),
            Err(LoadError::TooFewTokens { level: 2, line: 16, found: 2, expected: 3 })
        ));

        let miscounted = TRIGRAM_LM.replace("ngram 2=2", "ngram 2=3");
        assert!(matches!(
            model.load_from_reader(miscounted.as_bytes()),
            Err(LoadError::CountMismatch { level: 2, expected: 3, read: 2 })
        ));

        let beyond = TRIGRAM_LM.replace("\\3-grams:", "\\4-grams:");
        assert!(matches!(
            model.load_from_reader(beyond.as_bytes()),
            Err(LoadError::UnexpectedOrder { level: 4, .. })
        ));
        assert_eq!(model.get_counts().0.iter().sum::<usize>(), 4);
    }

    #[test]
    fn trailing_backoff_is_ignored() {
        let text = "
\\data\\
ngram 1=5
ngram 2=1

\\1-grams:
1 <unk>
1 <s>
1 </s>
1 <num>
2 whale

\\2-grams:
1 whale whale 1

\\end\\
";
        let mut model = NGramModel::dynamic(2);
        model.load_from_reader(text.as_bytes()).unwrap();
        assert_eq!(model.get_ngram_count(&["whale", "whale"]), 1);
        assert!(model.iter_ngrams().all(|e| e.time.is_none()));

        // time and backoff together
        let both = text.replace("1 whale whale 1", "1 7 whale whale 0");
        let mut model = NGramModel::cached(2);
        model.load_from_reader(both.as_bytes()).unwrap();
        let entry = model
            .iter_ngrams()
            .find(|e| e.ngram == ["whale", "whale"])
            .unwrap();
        assert_eq!((entry.count, entry.time), (1, Some(7)));

        let garbage = text.replace("1 whale whale 1", "1 whale whale x");
        assert!(matches!(
            NGramModel::dynamic(2).load_from_reader(garbage.as_bytes()),
            Err(LoadError::BadNumber { line: 14, .. })
        ));
    }

    #[test]
    fn line_layouts() {
        assert_eq!(LineLayout::detect(&["1", "a", "b"], 2), Some(LineLayout { time: false, backoff: false }));
        assert_eq!(LineLayout::detect(&["1", "5", "a", "b"], 2), Some(LineLayout { time: true, backoff: false }));
        assert_eq!(LineLayout::detect(&["1", "a", "b", "-0.3"], 2), Some(LineLayout { time: false, backoff: true }));
        assert_eq!(LineLayout::detect(&["1", "5", "a", "b", "2"], 2).map(|l| l.fields(2)), Some(5));
        assert_eq!(LineLayout::detect(&["1", "a", "b", "c"], 2), None);
        assert_eq!(LineLayout::detect(&["1", "a"], 2), None);
    }

    #[test]
    fn read_order_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.lm");
        std::fs::write(&path, TRIGRAM_LM).unwrap();
        assert_eq!(read_order(&path), Some(3));
        assert_eq!(read_order(dir.path().join("missing.lm")), None);

        std::fs::write(&path, "no header here\n").unwrap();
        assert_eq!(read_order(&path), None);
    }
}
