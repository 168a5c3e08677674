//! Validating reader for `.lm` files.
//!
//! Unlike [`NGramModel::load`](crate::NGramModel::load), which stops at the
//! first problem, validation reads the whole file and reports every
//! violation it finds together with a summary of what the file contains.
use std::fmt;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::lmfile::{decode_line, parse_section_head, LineLayout};

static DATA_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ngram\s+(\d+)=(\d+)$").expect("valid data entry regex"));

/// Number of trailing lines quoted by [`ValidationError::UnexpectedEof`].
const EOF_CONTEXT_LINES: usize = 5;

/// Stable names of the reportable problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    FileNotFound,
    NotAFile,
    EmptyFile,
    NoDataSection,
    UnexpectedEof,
    BadDataSectionEntry,
    EmptyDataSection,
    WrongNumberOfFields,
    UnexpectedNgramSection,
    WrongNgramCount,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ValidationErrorKind::NotAFile => "NOT_A_FILE",
            ValidationErrorKind::EmptyFile => "EMPTY_FILE",
            ValidationErrorKind::NoDataSection => "NO_DATA_SECTION",
            ValidationErrorKind::UnexpectedEof => "UNEXPECTED_EOF",
            ValidationErrorKind::BadDataSectionEntry => "BAD_DATA_SECTION_ENTRY",
            ValidationErrorKind::EmptyDataSection => "EMPTY_DATA_SECTION",
            ValidationErrorKind::WrongNumberOfFields => "WRONG_NUMBER_OF_FIELDS",
            ValidationErrorKind::UnexpectedNgramSection => "UNEXPECTED_NGRAM_SECTION",
            ValidationErrorKind::WrongNgramCount => "WRONG_NGRAM_COUNT",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found in a `.lm` file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file not found")]
    FileNotFound,

    #[error("not a regular file")]
    NotAFile,

    #[error("file is empty")]
    EmptyFile,

    #[error("no \\data\\ section")]
    NoDataSection,

    /// The file ended before `\end\`; carries the last lines read.
    #[error("unexpected end of file")]
    UnexpectedEof { last_lines: Vec<String> },

    /// A data section line that is not `ngram N=M`.
    #[error("bad data section entry '{line}'")]
    BadDataSectionEntry { line: String },

    #[error("empty data section")]
    EmptyDataSection,

    #[error("line {line_number}: found {found} fields, expected {expected}: '{line}'")]
    WrongNumberOfFields {
        found: usize,
        expected: usize,
        line_number: usize,
        line: String,
    },

    /// An n-gram section whose level the data section doesn't declare.
    #[error("unexpected section for level {level} with {read} n-grams")]
    UnexpectedNgramSection { level: usize, read: usize },

    #[error("level {level}: {declared} n-grams declared, but {read} read")]
    WrongNgramCount {
        level: usize,
        declared: usize,
        read: usize,
    },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::FileNotFound => ValidationErrorKind::FileNotFound,
            ValidationError::NotAFile => ValidationErrorKind::NotAFile,
            ValidationError::EmptyFile => ValidationErrorKind::EmptyFile,
            ValidationError::NoDataSection => ValidationErrorKind::NoDataSection,
            ValidationError::UnexpectedEof { .. } => ValidationErrorKind::UnexpectedEof,
            ValidationError::BadDataSectionEntry { .. } => ValidationErrorKind::BadDataSectionEntry,
            ValidationError::EmptyDataSection => ValidationErrorKind::EmptyDataSection,
            ValidationError::WrongNumberOfFields { .. } => ValidationErrorKind::WrongNumberOfFields,
            ValidationError::UnexpectedNgramSection { .. } => {
                ValidationErrorKind::UnexpectedNgramSection
            }
            ValidationError::WrongNgramCount { .. } => ValidationErrorKind::WrongNgramCount,
        }
    }

    /// Arguments as a bracketed list, strings quoted: `[3, 2, 14, '1 a b']`.
    pub fn args(&self) -> String {
        let args: Vec<String> = match self {
            ValidationError::UnexpectedEof { last_lines } => {
                let quoted: Vec<String> = last_lines.iter().map(|l| quote(l)).collect();
                vec![format!("[{}]", quoted.join(", "))]
            }
            ValidationError::BadDataSectionEntry { line } => vec![quote(line)],
            ValidationError::WrongNumberOfFields {
                found,
                expected,
                line_number,
                line,
            } => vec![
                found.to_string(),
                expected.to_string(),
                line_number.to_string(),
                quote(line),
            ],
            ValidationError::UnexpectedNgramSection { level, read } => {
                vec![level.to_string(), read.to_string()]
            }
            ValidationError::WrongNgramCount {
                level,
                declared,
                read,
            } => vec![level.to_string(), declared.to_string(), read.to_string()],
            _ => Vec::new(),
        };
        format!("[{}]", args.join(", "))
    }

    /// `KIND, [args]`, one line per error in tool output.
    pub fn report_line(&self) -> String {
        format!("{}, {}", self.kind(), self.args())
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Declared and encountered n-gram counts of one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: usize,
    pub declared: Option<usize>,
    pub encountered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub file_size: u64,
    pub num_lines: usize,
    pub levels: Vec<LevelInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    /// Missing when the file couldn't be read at all.
    pub info: Option<ModelInfo>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
            info: None,
        }
    }
}

/// Check the `.lm` file at `path`.
pub fn validate_file(path: impl AsRef<Path>) -> ValidationReport {
    let path = path.as_ref();
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return ValidationReport::error(ValidationError::FileNotFound),
    };
    if !metadata.is_file() {
        return ValidationReport::error(ValidationError::NotAFile);
    }
    if metadata.len() == 0 {
        return ValidationReport::error(ValidationError::EmptyFile);
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return ValidationReport::error(ValidationError::FileNotFound),
    };
    validate_bytes(&bytes)
}

/// Check `.lm` content held in memory.
pub fn validate_bytes(bytes: &[u8]) -> ValidationReport {
    if bytes.is_empty() {
        return ValidationReport::error(ValidationError::EmptyFile);
    }
    let lines: Vec<String> = bytes
        .split_inclusive(|b| *b == b'\n')
        .map(decode_line)
        .collect();

    let mut checker = Checker::default();
    for (i, line) in lines.iter().enumerate() {
        if checker.feed(i + 1, line) {
            break;
        }
    }
    checker.finish(&lines);

    let levels = checker.level_infos();
    ValidationReport {
        errors: checker.errors,
        info: Some(ModelInfo {
            file_size: bytes.len() as u64,
            num_lines: lines.len(),
            levels,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Begin,
    Data,
    NGrams,
    Done,
}

#[derive(Debug, Default)]
struct Checker {
    state: State,
    errors: Vec<ValidationError>,
    has_data_section: bool,
    data_entries: usize,
    /// declared count per level, index 0 = unigrams
    declared: Vec<Option<usize>>,
    encountered: Vec<usize>,
    level: usize,
    expected_fields: Option<usize>,
}

impl Checker {
    /// Process one line; true once `\end\` was reached.
    fn feed(&mut self, line_number: usize, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return false;
        }

        if trimmed.starts_with("\\data\\") {
            self.has_data_section = true;
            self.state = State::Data;
            return false;
        }

        if trimmed.starts_with('\\') {
            self.end_section();
            if trimmed.starts_with("\\end\\") {
                self.state = State::Done;
                return true;
            }
            if let Some(level) = parse_section_head(trimmed) {
                self.begin_section(level);
            }
            return false;
        }

        match self.state {
            State::Begin | State::Done => {}
            State::Data => self.data_entry(trimmed),
            State::NGrams => self.ngram_entry(line_number, trimmed),
        }
        false
    }

    fn data_entry(&mut self, line: &str) {
        let parsed = DATA_ENTRY_RE.captures(line).and_then(|caps| {
            let level: usize = caps[1].parse().ok()?;
            let count: usize = caps[2].parse().ok()?;
            (level >= 1).then_some((level, count))
        });
        match parsed {
            Some((level, count)) => {
                self.data_entries += 1;
                if self.declared.len() < level {
                    self.declared.resize(level, None);
                }
                self.declared[level - 1] = Some(count);
            }
            None => self.errors.push(ValidationError::BadDataSectionEntry {
                line: line.to_string(),
            }),
        }
    }

    fn begin_section(&mut self, level: usize) {
        if !self.has_data_section && !self.errors.contains(&ValidationError::NoDataSection) {
            self.errors.push(ValidationError::NoDataSection);
        }
        if level == 0 {
            return;
        }
        if self.encountered.len() < level {
            self.encountered.resize(level, 0);
        }
        self.level = level;
        self.expected_fields = None;
        self.state = State::NGrams;
    }

    fn ngram_entry(&mut self, line_number: usize, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let found = tokens.len();
        let level = self.level;

        // the first entry decides on the time and backoff columns
        let expected = match self.expected_fields {
            Some(expected) => expected,
            None => match LineLayout::detect(&tokens, level) {
                Some(layout) => {
                    self.expected_fields = Some(layout.fields(level));
                    found
                }
                None => level + 1,
            },
        };

        if found != expected {
            self.errors.push(ValidationError::WrongNumberOfFields {
                found,
                expected,
                line_number,
                line: line.to_string(),
            });
            return;
        }
        self.encountered[level - 1] += 1;
    }

    /// Close the data or n-gram section that is currently open.
    fn end_section(&mut self) {
        match self.state {
            State::Data => {
                if self.data_entries == 0 {
                    self.errors.push(ValidationError::EmptyDataSection);
                }
            }
            State::NGrams => {
                let level = self.level;
                let read = self.encountered[level - 1];
                match self.declared.get(level - 1).copied().flatten() {
                    Some(declared) if declared != read => {
                        self.errors.push(ValidationError::WrongNgramCount {
                            level,
                            declared,
                            read,
                        });
                    }
                    Some(_) => {}
                    None if self.has_data_section => {
                        self.errors
                            .push(ValidationError::UnexpectedNgramSection { level, read });
                    }
                    None => {}
                }
            }
            State::Begin | State::Done => {}
        }
        self.state = State::Begin;
    }

    fn finish(&mut self, lines: &[String]) {
        if self.state == State::Done {
            return;
        }
        self.end_section();
        if !self.has_data_section && !self.errors.contains(&ValidationError::NoDataSection) {
            self.errors.push(ValidationError::NoDataSection);
        }
        let start = lines.len().saturating_sub(EOF_CONTEXT_LINES);
        self.errors.push(ValidationError::UnexpectedEof {
            last_lines: lines[start..].to_vec(),
        });
    }

    fn level_infos(&self) -> Vec<LevelInfo> {
        let levels = self.declared.len().max(self.encountered.len());
        (1..=levels)
            .map(|level| LevelInfo {
                level,
                declared: self.declared.get(level - 1).copied().flatten(),
                encountered: self.encountered.get(level - 1).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIGRAM_LM: &str = "\n\\data\\\nngram 1=5\nngram 2=1\n\n\\1-grams:\n1 <unk>\n1 <s>\n1 </s>\n1 <num>\n2 whale\n\n\\2-grams:\n1 whale whale\n\n\\end\\\n";

    #[test]
    fn clean_file_reports_info() {
        let report = validate_bytes(BIGRAM_LM.as_bytes());
        assert!(report.is_ok(), "{:?}", report.errors);
        let info = report.info.unwrap();
        assert_eq!(info.num_lines, 16);
        assert_eq!(
            info.levels[1],
            LevelInfo {
                level: 2,
                declared: Some(1),
                encountered: 1
            }
        );
    }

    #[test]
    fn report_line_format() {
        let e = ValidationError::WrongNumberOfFields {
            found: 2,
            expected: 3,
            line_number: 14,
            line: "1 whale".into(),
        };
        assert_eq!(e.report_line(), "WRONG_NUMBER_OF_FIELDS, [2, 3, 14, '1 whale']");
        assert_eq!(ValidationError::EmptyFile.report_line(), "EMPTY_FILE, []");
        let eof = ValidationError::UnexpectedEof {
            last_lines: vec!["\n".into(), "end".into()],
        };
        assert_eq!(eof.report_line(), "UNEXPECTED_EOF, [['\\n', 'end']]");
    }

    #[test]
    fn time_column_is_accepted() {
        let text = BIGRAM_LM.replace("1 whale whale", "1 7 whale whale");
        assert!(validate_bytes(text.as_bytes()).is_ok());
    }

    #[test]
    fn trailing_backoff_is_accepted() {
        let text = BIGRAM_LM.replace("1 whale whale", "1 whale whale 1");
        let report = validate_bytes(text.as_bytes());
        assert!(report.is_ok(), "{:?}", report.errors);
        assert_eq!(report.info.unwrap().levels[1].encountered, 1);

        let text = BIGRAM_LM.replace("1 whale whale", "1 whale whale x");
        assert_eq!(
            validate_bytes(text.as_bytes()).errors[0].kind(),
            ValidationErrorKind::WrongNumberOfFields
        );
    }

    #[test]
    fn counts_and_sections() {
        let text = BIGRAM_LM.replace("ngram 2=1", "ngram 2=2");
        let kinds: Vec<_> = validate_bytes(text.as_bytes())
            .errors
            .iter()
            .map(|e| e.report_line())
            .collect();
        assert_eq!(kinds, vec!["WRONG_NGRAM_COUNT, [2, 2, 1]"]);

        let text = BIGRAM_LM.replace("ngram 1=5\n", "");
        let errors = validate_bytes(text.as_bytes()).errors;
        assert_eq!(
            errors,
            vec![ValidationError::UnexpectedNgramSection { level: 1, read: 5 }]
        );
    }
}
