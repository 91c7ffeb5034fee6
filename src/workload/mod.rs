//! Converts trend modes to feature extractors.
//!
//! # Example
//!
//! To get the hashtag extractor:
//! ```
//! use trendlite::{workload, Mode};
//! let hashtags = workload::try_named("hashtags").unwrap();
//! assert_eq!(hashtags.mode, Mode::Hashtags);
//! ```

use crate::error::RecordError;
use crate::source::Record;
use crate::{FeatureKey, Mode};

pub mod hashtag;
pub mod language;

/// The features found in one record, or why the record cannot be counted.
pub type ExtractOutput = Result<Vec<FeatureKey>, RecordError>;

/// An extract function maps one record to zero or more feature keys.
pub type ExtractFn = fn(record: &Record) -> ExtractOutput;

/// A feature extraction strategy.
#[derive(Copy, Clone)]
pub struct Extractor {
    pub mode: Mode,
    pub extract_fn: ExtractFn,
}

impl Extractor {
    #[inline]
    pub fn extract(&self, record: &Record) -> ExtractOutput {
        (self.extract_fn)(record)
    }
}

/// Gets the [`Extractor`] for `mode`.
pub fn for_mode(mode: Mode) -> Extractor {
    match mode {
        Mode::Hashtags => Extractor {
            mode,
            extract_fn: hashtag::extract,
        },
        Mode::Language => Extractor {
            mode,
            extract_fn: language::extract,
        },
    }
}

/// Gets the [`Extractor`] named `name`.
///
/// Returns [`None`] if no extractor with the given name was found.
pub fn try_named(name: &str) -> Option<Extractor> {
    match name {
        "hashtags" | "hashtag" => Some(for_mode(Mode::Hashtags)),
        "language" | "languages" => Some(for_mode(Mode::Language)),
        _ => None,
    }
}
