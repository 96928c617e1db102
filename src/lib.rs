pub mod cache;
pub mod config;
pub mod gallery;
pub mod identify;
pub mod matcher;

pub use gallery::{EnrolledIdentity, FileGallery, GalleryError, GalleryProvider};
pub use identify::{Identifier, MatchDecision, MatchSettings, ScanPolicy};
pub use matcher::{MatchError, Matcher, SampleError, Verification};

// Re-export engine types for convenience
pub use printmatch_engine::{
    decode, CaptureEnvelope, Comparator, CorrelationEngine, TemplateBuilder, TemplateInput,
    Threshold,
};
