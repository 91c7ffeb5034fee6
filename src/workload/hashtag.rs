//! Hashtag extraction.
//!
//! Text is split on ASCII punctuation other than `#` and `_`, and on any
//! whitespace. Tabs and newlines separate tokens the same way spaces do. A
//! lower-cased token is a tag when it starts with `#`; the rest of the token
//! is kept whole, non-ASCII letters included.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::RecordError;
use crate::source::Record;
use crate::workload::ExtractOutput;

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| {
        Regex::new(r#"[!"$%&'()*+,\-./:;<=>?@\[\\\]^`{|}~\s]"#).expect("separator class is valid")
    })
}

/// Lower-cased hashtags of a piece of text, in order of appearance.
///
/// `#` and `_` are not separators, so `#rust_lang` stays whole while
/// `#rust-lang` yields `#rust`. `#México` yields `#méxico`.
pub fn hashtags(text: &str) -> impl Iterator<Item = String> + '_ {
    separators()
        .split(text)
        .map(str::to_lowercase)
        .filter(|token| token.starts_with('#'))
}

pub fn extract(record: &Record) -> ExtractOutput {
    let text = record.text().ok_or(RecordError::MissingField("doc.text"))?;
    Ok(hashtags(text).collect())
}
