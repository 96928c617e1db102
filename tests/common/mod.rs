#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use printmatch::{
    CaptureEnvelope, Comparator, EnrolledIdentity, GalleryError, GalleryProvider,
    TemplateBuilder, TemplateInput,
};
use printmatch_engine::{ComparatorError, TemplateError};

pub const PROBE: u8 = 0;

/// 2x2 sample whose pixels all carry `tag`; stub templates are the tag itself.
pub fn sample(tag: u8) -> TemplateInput {
    TemplateInput {
        image_bytes: vec![tag; 4],
        width: 2,
        height: 2,
        dpi: 500,
    }
}

pub fn envelope(tag: u8) -> CaptureEnvelope {
    CaptureEnvelope::encode(&sample(tag))
}

pub fn identity(id: i64, envelope: Option<CaptureEnvelope>) -> EnrolledIdentity {
    EnrolledIdentity {
        identity_id: id,
        display_name: format!("Resident {id}"),
        stored_envelope: envelope,
        external_account_id: 1000 + id,
        external_username: format!("resident{id}"),
        external_role: "resident".to_string(),
    }
}

/// Identity `id` enrolled with a sample tagged `id`.
pub fn enrolled(id: u8) -> EnrolledIdentity {
    identity(id as i64, Some(envelope(id)))
}

#[derive(Default)]
pub struct TagBuilder {
    builds: AtomicUsize,
    rejected: HashSet<u8>,
}

impl TagBuilder {
    pub fn rejecting(tags: &[u8]) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            rejected: tags.iter().copied().collect(),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl TemplateBuilder for TagBuilder {
    type Template = u8;

    fn build(&self, input: TemplateInput) -> Result<u8, TemplateError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let tag = input.image_bytes[0];
        if self.rejected.contains(&tag) {
            return Err(TemplateError::Rejected(format!("tag {tag} rejected")));
        }
        Ok(tag)
    }
}

/// Scores each candidate tag from a fixed table; unknown tags fail to compare.
#[derive(Default)]
pub struct TableComparator {
    scores: HashMap<u8, i32>,
    delays: HashMap<u8, Duration>,
    calls: AtomicUsize,
}

impl TableComparator {
    pub fn new(scores: &[(u8, i32)]) -> Self {
        Self {
            scores: scores.iter().copied().collect(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make comparisons against `tag` take `delay`.
    pub fn with_delay(mut self, tag: u8, delay: Duration) -> Self {
        self.delays.insert(tag, delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Comparator<u8> for TableComparator {
    fn compare(&self, _probe: &u8, candidate: &u8) -> Result<i32, ComparatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(candidate) {
            thread::sleep(*delay);
        }
        self.scores
            .get(candidate)
            .copied()
            .ok_or_else(|| ComparatorError(format!("engine fault on tag {candidate}")))
    }
}

/// Symmetric stub: 1000 points per unit of tag distance.
pub struct DistanceComparator;

impl Comparator<u8> for DistanceComparator {
    fn compare(&self, probe: &u8, candidate: &u8) -> Result<i32, ComparatorError> {
        Ok((*probe as i32 - *candidate as i32).abs() * 1000)
    }
}

pub struct StaticGallery {
    identities: Mutex<Vec<EnrolledIdentity>>,
    fetches: AtomicUsize,
}

impl StaticGallery {
    pub fn new(identities: Vec<EnrolledIdentity>) -> Self {
        Self {
            identities: Mutex::new(identities),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn replace(&self, identities: Vec<EnrolledIdentity>) {
        *self.identities.lock() = identities;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl GalleryProvider for StaticGallery {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.identities.lock().clone())
    }
}

/// Gallery that must never be consulted.
pub struct UntouchableGallery;

impl GalleryProvider for UntouchableGallery {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        panic!("gallery consulted for an unusable probe");
    }
}

/// Gallery whose backend takes `delay` to answer.
pub struct SlowGallery {
    pub delay: Duration,
    pub identities: Vec<EnrolledIdentity>,
}

impl GalleryProvider for SlowGallery {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        thread::sleep(self.delay);
        Ok(self.identities.clone())
    }
}

pub struct DownGallery;

impl GalleryProvider for DownGallery {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        Err(GalleryError::Backend("connection refused".to_string()))
    }
}
