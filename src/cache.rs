use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use printmatch_engine::CaptureEnvelope;
use sha2::{Digest, Sha256};

type EnvelopeDigest = [u8; 32];

struct CachedTemplate<T> {
    digest: EnvelopeDigest,
    template: Arc<T>,
}

/// Gallery templates kept across identification calls.
///
/// Entries are keyed by identity and checked against a SHA-256 digest of the
/// stored envelope, so a re-enrolled identity is rebuilt on its next lookup.
pub struct TemplateCache<T> {
    entries: Mutex<HashMap<i64, CachedTemplate<T>>>,
}

impl<T> Default for TemplateCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> TemplateCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached template for `identity_id`, or the result of `build`.
    ///
    /// `build` runs without the lock held. Failures are not cached.
    pub fn get_or_build<E>(
        &self,
        identity_id: i64,
        envelope: &CaptureEnvelope,
        build: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        let digest = digest(envelope);
        if let Some(cached) = self.entries.lock().get(&identity_id) {
            if cached.digest == digest {
                return Ok(Arc::clone(&cached.template));
            }
            debug!("stored envelope for identity {} changed", identity_id);
        }

        let template = Arc::new(build()?);
        self.entries.lock().insert(
            identity_id,
            CachedTemplate {
                digest,
                template: Arc::clone(&template),
            },
        );
        Ok(template)
    }

    /// Drop entries for identities that are no longer enrolled.
    pub fn retain_identities(&self, live: &HashSet<i64>) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, _| live.contains(id));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("evicted {} cached templates", evicted);
        }
    }

    pub fn invalidate(&self, identity_id: i64) {
        self.entries.lock().remove(&identity_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn digest(envelope: &CaptureEnvelope) -> EnvelopeDigest {
    Sha256::digest(envelope.as_str().as_bytes()).into()
}
