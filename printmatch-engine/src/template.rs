use std::sync::Arc;

use thiserror::Error;

/// Score that a comparator reports for two templates with no similarity at all.
///
/// Scores are false-match probabilities scaled so that this value means 1.0.
pub const PROBABILITY_ONE: i32 = 0x7fff_ffff;

/// Default acceptance budget: one false match in this many comparisons.
pub const DEFAULT_FALSE_MATCH_ODDS: u32 = 100_000;

/// Decoded sample ready for template extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInput {
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl TemplateInput {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("sample holds {actual} bytes but {width}x{height} needs {expected}")]
    Dimensions {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("template builder rejected sample: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
#[error("comparison failed: {0}")]
pub struct ComparatorError(pub String);

/// Turns a decoded sample into an opaque comparable template.
pub trait TemplateBuilder {
    type Template;

    fn build(&self, input: TemplateInput) -> Result<Self::Template, TemplateError>;
}

/// Scores the dissimilarity of two templates; lower is more similar.
pub trait Comparator<T: ?Sized> {
    fn compare(&self, probe: &T, candidate: &T) -> Result<i32, ComparatorError>;
}

impl<B: TemplateBuilder + ?Sized> TemplateBuilder for &B {
    type Template = B::Template;

    fn build(&self, input: TemplateInput) -> Result<Self::Template, TemplateError> {
        (**self).build(input)
    }
}

impl<T: ?Sized, C: Comparator<T> + ?Sized> Comparator<T> for &C {
    fn compare(&self, probe: &T, candidate: &T) -> Result<i32, ComparatorError> {
        (**self).compare(probe, candidate)
    }
}

impl<B: TemplateBuilder + ?Sized> TemplateBuilder for Arc<B> {
    type Template = B::Template;

    fn build(&self, input: TemplateInput) -> Result<Self::Template, TemplateError> {
        (**self).build(input)
    }
}

impl<T: ?Sized, C: Comparator<T> + ?Sized> Comparator<T> for Arc<C> {
    fn compare(&self, probe: &T, candidate: &T) -> Result<i32, ComparatorError> {
        (**self).compare(probe, candidate)
    }
}

/// Exclusive upper bound on accepted scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Threshold(i32);

impl Threshold {
    pub const fn new(max_exclusive: i32) -> Self {
        Self(max_exclusive)
    }

    /// Threshold for a "one in `odds`" false-match budget. `None` for zero odds.
    pub fn from_false_match_odds(odds: u32) -> Option<Self> {
        if odds == 0 {
            return None;
        }
        Some(Self((PROBABILITY_ONE as i64 / odds as i64) as i32))
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    pub fn accepts(self, score: i32) -> bool {
        score < self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(PROBABILITY_ONE / DEFAULT_FALSE_MATCH_ODDS as i32)
    }
}
