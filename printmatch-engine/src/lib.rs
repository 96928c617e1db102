//! Capture envelope codec and the template/comparison capability seam.

pub mod correlation;
pub mod envelope;
pub mod template;

// Re-export commonly used types
pub use correlation::{CorrelationEngine, CorrelationTemplate};
pub use envelope::{decode, CaptureEnvelope, DecodeError};
pub use template::{
    Comparator, ComparatorError, TemplateBuilder, TemplateError, TemplateInput, Threshold,
    PROBABILITY_ONE,
};
