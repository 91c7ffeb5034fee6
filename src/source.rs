//! Reading records and carving them into shards.
//!
//! A record dump is a JSON export with one row per line:
//!
//! ```text
//! {"total_rows":2,"offset":0,"rows":[
//! {"id":"1","doc":{"text":"#rust is fun","metadata":{"iso_language_code":"en"}}},
//! {"id":"2","doc":{"text":"hola #rust","metadata":{"iso_language_code":"es"}}}
//! ]}
//! ```
//!
//! A leading comma on a row is accepted as well as a trailing one. An export
//! that opens its `rows` array and continues on the same line is rejected
//! instead of being read as empty.
//!
//! Rows are only parsed by the rank that owns them. Every non-structural
//! line occupies one index whether or not it parses, so all ranks agree on
//! record positions without talking to each other.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use glob::glob;
use serde::Deserialize;
use tracing::warn;

use crate::error::RecordError;
use crate::Shard;

/////////////////////////////////////////////////////////////////////////////
// Records
/////////////////////////////////////////////////////////////////////////////

/// One row of the record dump. Only the fields extractors read are kept.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub doc: Doc,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Doc {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub iso_language_code: Option<String>,
}

impl Record {
    /// Parse a single row.
    ///
    /// The last row of an export may carry the closing `]}` of the enclosing
    /// document on the same line; that suffix is dropped if the row does not
    /// parse with it.
    pub fn parse(row: &str) -> Result<Self, RecordError> {
        match serde_json::from_str(row) {
            Ok(record) => Ok(record),
            Err(err) => match row.strip_suffix("]}") {
                Some(trimmed) => {
                    serde_json::from_str(trimmed.trim_end().trim_end_matches(','))
                        .map_err(|_| RecordError::Json(err))
                }
                None => Err(RecordError::Json(err)),
            },
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.doc.text.as_deref()
    }

    pub fn language_code(&self) -> Option<&str> {
        self.doc
            .metadata
            .as_ref()
            .and_then(|m| m.iso_language_code.as_deref())
    }
}

/////////////////////////////////////////////////////////////////////////////
// Raw rows
/////////////////////////////////////////////////////////////////////////////

/// Splits a row-per-line JSON export into raw row payloads.
///
/// Yields an `Err` when the underlying reader fails or when the export does
/// not keep one row per line; both are fatal to the rank. Lines that are not
/// valid UTF-8 are converted lossily and left to fail as malformed records
/// later.
pub struct JsonRows<R> {
    reader: R,
    buf: Vec<u8>,
    seen_row: bool,
}

impl<R: BufRead> JsonRows<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            seen_row: false,
        }
    }
}

/// Whether a trimmed line is part of the export's envelope rather than a row.
fn is_structural(line: &str) -> bool {
    line.is_empty() || line.starts_with(']') || (line.starts_with('{') && line.ends_with('['))
}

/// What follows the opening `[` of the `rows` array, if this line opens it.
fn after_rows_open(line: &str) -> Option<&str> {
    let at = line.find("\"rows\"")?;
    let rest = line[at + "\"rows\"".len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start().strip_prefix('[')?;
    Some(rest.trim_start())
}

impl<R: BufRead> Iterator for JsonRows<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.buf);
                    let line = line.trim();
                    if is_structural(line) {
                        continue;
                    }
                    if !self.seen_row && line.starts_with('{') {
                        match after_rows_open(line) {
                            // `"rows":[]}` on one line: an empty export
                            Some(rest) if rest.starts_with(']') => continue,
                            Some(_) => {
                                return Some(Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "export does not hold one row per line",
                                )))
                            }
                            None => {}
                        }
                    }
                    self.seen_row = true;
                    let row = line.strip_prefix(',').unwrap_or(line).trim_start();
                    let row = row.strip_suffix(',').unwrap_or(row);
                    return Some(Ok(row.to_string()));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Every row of every file matching an input spec, in sorted path order.
pub struct RecordSource {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<JsonRows<BufReader<File>>>,
}

impl RecordSource {
    /// Resolve `spec`, a path or a glob pattern, to the files it names.
    ///
    /// Fails if the pattern is invalid or matches nothing. Files are opened
    /// lazily as the previous one is exhausted.
    pub fn open(spec: &str) -> Result<Self> {
        let mut files = glob(spec)
            .with_context(|| format!("invalid input spec `{spec}`"))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("cannot read input `{spec}`"))?;
        if files.is_empty() {
            bail!("no input file matches `{spec}`");
        }
        files.sort();
        Ok(Self {
            files: files.into_iter(),
            current: None,
        })
    }
}

impl Iterator for RecordSource {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rows) = self.current.as_mut() {
                if let Some(row) = rows.next() {
                    return Some(row);
                }
            }
            let path = self.files.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some(JsonRows::new(BufReader::new(file))),
                Err(err) => {
                    return Some(Err(io::Error::new(
                        err.kind(),
                        format!("cannot open {}: {err}", path.display()),
                    )))
                }
            }
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Shard scanning
/////////////////////////////////////////////////////////////////////////////

/// Lazily yields the parsed records of one shard.
///
/// Read errors are returned and end the scan; malformed rows in the shard are
/// logged, counted, and skipped.
pub struct ShardScanner<I> {
    rows: std::iter::Enumerate<I>,
    shard: Shard,
    skipped: usize,
}

impl<I> ShardScanner<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(rows: I, shard: Shard) -> Self {
        Self {
            rows: rows.enumerate(),
            shard,
            skipped: 0,
        }
    }

    /// Malformed rows of this shard seen so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Record that a row of this shard was dropped after parsing.
    pub(crate) fn skip_record(&mut self, index: usize, err: &RecordError) {
        warn!(rank = self.shard.rank, index, %err, "Skipping malformed record");
        self.skipped += 1;
    }
}

impl<I> Iterator for ShardScanner<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    /// The record's position in the whole source, and the record.
    type Item = Result<(usize, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, row) = self.rows.next()?;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    return Some(
                        Err(err).with_context(|| format!("record source failed at record {index}")),
                    )
                }
            };
            if !self.shard.owns(index) {
                continue;
            }
            match Record::parse(&row) {
                Ok(record) => return Some(Ok((index, record))),
                Err(err) => self.skip_record(index, &err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = r##"{"total_rows":4,"offset":0,"rows":[
{"id":"0","doc":{"text":"zero #a"}},
{"id":"1","doc":{"text":"one #b"}},
{"id":"2","doc":{"text":"two #c"}},
{"id":"3","doc":{"text":"three #d"}}
]}
"##;

    fn rows(text: &str) -> JsonRows<Cursor<Vec<u8>>> {
        JsonRows::new(Cursor::new(text.as_bytes().to_vec()))
    }

    fn texts(scanner: ShardScanner<JsonRows<Cursor<Vec<u8>>>>) -> Vec<(usize, String)> {
        scanner
            .map(|item| {
                let (index, record) = item.unwrap();
                (index, record.text().unwrap().to_string())
            })
            .collect()
    }

    #[test]
    fn envelope_lines_are_not_records() {
        let rows: Vec<String> = rows(DUMP).map(Result::unwrap).collect();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|row| row.starts_with('{') && row.ends_with('}')));
    }

    #[test]
    fn closing_bracket_on_last_row_is_recovered() {
        let record = Record::parse(r#"{"doc":{"text":"last"}}]}"#).unwrap();
        assert_eq!(record.text(), Some("last"));
    }

    #[test]
    fn json_lines_are_accepted() {
        let text = "{\"doc\":{\"text\":\"a\"}}\n{\"doc\":{\"text\":\"b\"}}\n";
        let scanner = ShardScanner::new(rows(text), Shard::new(0, 1));
        assert_eq!(texts(scanner).len(), 2);
    }

    #[test]
    fn shard_takes_every_wth_record() {
        let even = texts(ShardScanner::new(rows(DUMP), Shard::new(0, 2)));
        let odd = texts(ShardScanner::new(rows(DUMP), Shard::new(1, 2)));
        assert_eq!(
            even,
            vec![(0, "zero #a".to_string()), (2, "two #c".to_string())]
        );
        assert_eq!(
            odd,
            vec![(1, "one #b".to_string()), (3, "three #d".to_string())]
        );
    }

    #[test]
    fn malformed_rows_keep_their_index_and_are_skipped() {
        let text = "{\"doc\":{\"text\":\"a\"}},\n{not json},\n{\"doc\":{\"text\":\"c\"}}\n";
        let mut scanner = ShardScanner::new(rows(text), Shard::new(0, 1));
        let indices: Vec<usize> = scanner.by_ref().map(|r| r.unwrap().0).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(scanner.skipped(), 1);
    }

    #[test]
    fn malformed_rows_outside_the_shard_are_not_counted() {
        let text = "{\"doc\":{}}\n{not json}\n";
        let mut scanner = ShardScanner::new(rows(text), Shard::new(0, 2));
        assert_eq!(scanner.by_ref().count(), 1);
        assert_eq!(scanner.skipped(), 0);
    }

    #[test]
    fn read_errors_are_fatal() {
        let source = vec![
            Ok("{}".to_string()),
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire")),
        ];
        let results: Vec<_> = ShardScanner::new(source.into_iter(), Shard::new(0, 2)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn compact_export_is_rejected() {
        let text = r##"{"total_rows":2,"offset":0,"rows":[{"id":"1","doc":{"text":"#a"}},{"id":"2","doc":{"text":"#b"}}]}"##;
        let mut scanner = ShardScanner::new(rows(text), Shard::new(0, 1));
        assert!(scanner.next().unwrap().is_err());
    }

    #[test]
    fn header_sharing_a_line_with_a_row_is_rejected() {
        let text = "{\"total_rows\":2,\"rows\": [{\"doc\":{\"text\":\"#a\"}},\n{\"doc\":{\"text\":\"#b\"}}\n]}\n";
        let first = rows(text).next().unwrap();
        assert_eq!(first.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn compact_empty_export_has_no_rows() {
        let text = r#"{"total_rows":0,"offset":0,"rows":[]}"#;
        assert_eq!(rows(text).count(), 0);
    }

    #[test]
    fn comma_first_rows_are_accepted() {
        let text = "{\"total_rows\":3,\"rows\":[\n{\"doc\":{\"text\":\"a\"}}\n,{\"doc\":{\"text\":\"b\"}}\n, {\"doc\":{\"text\":\"c\"}}\n]}\n";
        let scanner = ShardScanner::new(rows(text), Shard::new(0, 1));
        let got: Vec<String> = texts(scanner).into_iter().map(|(_, text)| text).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_input_is_an_error() {
        assert!(RecordSource::open("/definitely/not/here/*.json").is_err());
    }
}
