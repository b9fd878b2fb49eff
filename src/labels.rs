//! Label table.
//!
//! Labels are read once at startup from a newline-delimited file and never
//! modified afterwards. Index `i` of the table names class `i` of the model's
//! score vector.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Maximum number of labels held by a table.
pub const MAX_LABELS: usize = 100;

/// Maximum label length in bytes, including the terminator slot.
pub const MAX_LABEL_LEN: usize = 64;

/// Ordered, fixed-capacity list of class labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Load labels from `path`, one per line.
    ///
    /// A single trailing `\n` is stripped from every line. Reading stops at end
    /// of file or once `MAX_LABELS` entries are held; any further lines are
    /// dropped with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("could not open label file {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("could not read label file {}", path.display()))
    }

    /// Build a table from any buffered reader. Bytes that are not valid
    /// UTF-8 are replaced with U+FFFD.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut labels = Vec::new();
        let mut line = Vec::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            line_no += 1;
            if labels.len() == MAX_LABELS {
                let mut dropped = 1usize;
                line.clear();
                while reader.read_until(b'\n', &mut line)? != 0 {
                    dropped += 1;
                    line.clear();
                }
                log::warn!(
                    "label table full at {} entries; {} trailing line(s) ignored",
                    MAX_LABELS,
                    dropped
                );
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line);
            if matches!(text, Cow::Owned(_)) {
                log::warn!("label on line {} is not valid UTF-8: {:?}", line_no, text);
            }
            labels.push(truncate_label(&text));
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Exact, case-sensitive membership test.
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|entry| entry == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            labels: iter
                .into_iter()
                .take(MAX_LABELS)
                .map(|label| truncate_label(&label.into()))
                .collect(),
        }
    }
}

fn truncate_label(label: &str) -> String {
    let limit = MAX_LABEL_LEN - 1;
    if label.len() <= limit {
        return label.to_string();
    }
    let mut end = limit;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    log::warn!("label {:?} truncated to {} bytes", label, end);
    label[..end].to_string()
}
