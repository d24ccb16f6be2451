//! Merges Reduce replies into one table and renders the final report.

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

use crate::chunker::is_alpha;
use crate::error::{MrError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordCount {
    pub word: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
}

/// Word -> count table built from every Reduce reply.
#[derive(Debug, Default)]
pub struct ResultTable {
    counts: HashMap<String, u64>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: &str, count: u64) {
        *self.counts.entry(word.to_string()).or_insert(0) += count;
    }

    pub fn get(&self, word: &str) -> Option<u64> {
        self.counts.get(word).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Fold a Reduce reply (`cat1the12`) into the table.
    pub fn fold_reply(&mut self, payload: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < payload.len() {
            let word_end = scan(payload, pos, is_alpha);
            if word_end == pos {
                return Err(MrError::Decode(format!(
                    "expected a word at byte {pos} of a reduce reply, found {:#04x}",
                    payload[pos]
                )));
            }
            let count_end = scan(payload, word_end, |b| b.is_ascii_digit());

            // The run is ASCII by construction.
            let word = String::from_utf8_lossy(&payload[pos..word_end]);
            if count_end > word_end {
                let digits = String::from_utf8_lossy(&payload[word_end..count_end]);
                let count = digits.parse::<u64>().map_err(|e| {
                    MrError::Decode(format!("bad count {digits:?} for {word:?}: {e}"))
                })?;
                self.add(&word, count);
            }
            pos = count_end;
        }
        Ok(())
    }

    /// Order by count descending, ties by word ascending. Empty words are
    /// dropped.
    pub fn into_report(self) -> Result<Report> {
        let rows = self
            .counts
            .into_iter()
            .filter(|(word, _)| !word.is_empty())
            .map(|(word, count)| WordCount { word, count })
            .collect();
        Ok(Report {
            rows: order_rows(rows)?,
        })
    }
}

/// Sort rows for the report. A word may appear only once.
fn order_rows(mut rows: Vec<WordCount>) -> Result<Vec<WordCount>> {
    // Equal words are only adjacent when sorted by word alone.
    rows.sort_by(|a, b| a.word.cmp(&b.word));
    if let Some(pair) = rows.windows(2).find(|pair| pair[0].word == pair[1].word) {
        return Err(MrError::DuplicateKey(pair[0].word.clone()));
    }

    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    Ok(rows)
}

impl<S: AsRef<str>> FromIterator<(S, u64)> for ResultTable {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut table = ResultTable::new();
        for (word, count) in iter {
            table.add(word.as_ref(), count);
        }
        table
    }
}

fn scan(bytes: &[u8], start: usize, pred: impl Fn(u8) -> bool) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| !pred(b))
        .map_or(bytes.len(), |len| start + len)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    rows: Vec<WordCount>,
}

impl Report {
    pub fn rows(&self) -> &[WordCount] {
        &self.rows
    }

    pub fn write<W: Write>(&self, format: ReportFormat, out: W) -> Result<()> {
        match format {
            ReportFormat::Csv => self.write_csv(out),
            ReportFormat::Json => self.write_json(out),
        }
    }

    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(out, "word,frequency")?;
        for row in &self.rows {
            writeln!(out, "{},{}", row.word, row.count)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_json<W: Write>(&self, mut out: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut out, &self.rows).map_err(MrError::encode)?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }
}
