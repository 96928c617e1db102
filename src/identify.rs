use std::collections::HashSet;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use printmatch_engine::{CaptureEnvelope, Comparator, TemplateBuilder, Threshold};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::TemplateCache;
use crate::gallery::{EnrolledIdentity, GalleryError, GalleryProvider};
use crate::matcher::{Matcher, SampleError};

/// Which accepted candidate a gallery scan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPolicy {
    /// First candidate in gallery order whose score is under the threshold.
    #[default]
    FirstMatch,
    /// Lowest-scoring candidate under the threshold; ties go to gallery order.
    BestMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    pub threshold: Threshold,
    pub policy: ScanPolicy,
    /// Concurrent comparisons; `0` means one per CPU.
    pub workers: usize,
    pub deadline: Option<Duration>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            threshold: Threshold::default(),
            policy: ScanPolicy::FirstMatch,
            workers: 1,
            deadline: None,
        }
    }
}

impl MatchSettings {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get(),
            n => n,
        }
    }
}

/// Outcome of one identification call.
#[derive(Debug)]
pub enum MatchDecision {
    Matched {
        identity: EnrolledIdentity,
        score: i32,
    },
    /// Every enrolled candidate was compared and none met the threshold.
    NoMatch,
    ProbeRejected(SampleError),
    TimedOut,
    Unavailable(GalleryError),
}

impl MatchDecision {
    pub fn matched(&self) -> bool {
        matches!(self, MatchDecision::Matched { .. })
    }

    pub fn identity(&self) -> Option<&EnrolledIdentity> {
        match self {
            MatchDecision::Matched { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn score(&self) -> Option<i32> {
        match self {
            MatchDecision::Matched { score, .. } => Some(*score),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchDecision::Matched { .. } => "matched",
            MatchDecision::NoMatch => "no-match",
            MatchDecision::ProbeRejected(_) => "probe-rejected",
            MatchDecision::TimedOut => "timed-out",
            MatchDecision::Unavailable(_) => "unavailable",
        }
    }
}

/// Identifies a probe capture against the enrolled gallery.
///
/// Collaborators are shared with the scan threads, so a call that hits its
/// deadline returns at once and leaves any stuck fetch or comparison to finish
/// in the background.
pub struct Identifier<G, B: TemplateBuilder, C> {
    gallery: Arc<G>,
    matcher: Arc<Matcher<B, C>>,
    settings: MatchSettings,
    cache: Option<Arc<TemplateCache<B::Template>>>,
}

impl<G, B, C> Identifier<G, B, C>
where
    G: GalleryProvider + Send + Sync + 'static,
    B: TemplateBuilder + Send + Sync + 'static,
    B::Template: Send + Sync + 'static,
    C: Comparator<B::Template> + Send + Sync + 'static,
{
    pub fn new(gallery: G, builder: B, comparator: C, settings: MatchSettings) -> Self {
        Self {
            gallery: Arc::new(gallery),
            matcher: Arc::new(Matcher::new(builder, comparator, settings.threshold)),
            settings,
            cache: None,
        }
    }

    /// Keep gallery templates between calls instead of rebuilding them.
    pub fn with_template_cache(mut self) -> Self {
        self.cache = Some(Arc::new(TemplateCache::new()));
        self
    }

    pub fn matcher(&self) -> &Matcher<B, C> {
        &self.matcher
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&TemplateCache<B::Template>> {
        self.cache.as_deref()
    }

    pub fn verify(&self, stored: &CaptureEnvelope, probe: &CaptureEnvelope) -> bool {
        self.matcher.verify(stored, probe)
    }

    pub fn identify(&self, probe: &CaptureEnvelope) -> MatchDecision {
        let request = Uuid::new_v4();
        let started = Instant::now();
        let deadline = self.settings.deadline.map(|limit| started + limit);
        info!("[{}] starting identification", request);

        let matcher = Arc::clone(&self.matcher);
        let provider = Arc::clone(&self.gallery);
        let envelope = probe.clone();
        let fetched = bounded(deadline, move || -> Result<_, MatchDecision> {
            let probe = matcher.prepare(&envelope).map_err(|err| {
                warn!("[{}] probe rejected: {}", request, err);
                MatchDecision::ProbeRejected(err)
            })?;
            let gallery = provider.fetch_all().map_err(|err| {
                error!("[{}] gallery unavailable: {}", request, err);
                MatchDecision::Unavailable(err)
            })?;
            Ok((probe, gallery))
        });
        let (probe, gallery) = match fetched {
            Some(Ok(fetched)) => fetched,
            Some(Err(decision)) => return decision,
            None => return timed_out(request, started),
        };
        info!(
            "[{}] fetched {} identities for comparison",
            request,
            gallery.len()
        );

        if let Some(cache) = &self.cache {
            let live: HashSet<i64> = gallery
                .iter()
                .filter(|entry| entry.enrolled_envelope().is_some())
                .map(|entry| entry.identity_id)
                .collect();
            cache.retain_identities(&live);
        }

        let workers = self.settings.worker_count().clamp(1, gallery.len().max(1));
        let scan = Arc::new(Scan {
            matcher: Arc::clone(&self.matcher),
            cache: self.cache.clone(),
            probe,
            gallery,
            request,
            deadline,
            first_match: self.settings.policy == ScanPolicy::FirstMatch,
            cursor: AtomicUsize::new(0),
            cutoff: AtomicUsize::new(usize::MAX),
            stopped: AtomicBool::new(false),
        });

        let (results, received) = mpsc::channel();
        let handles = if workers == 1 && deadline.is_none() {
            scan.work(results);
            Vec::new()
        } else {
            scan.spawn_workers(workers, results)
        };
        let outcome = scan.collect(received);
        scan.stopped.store(true, Ordering::Release);

        match outcome {
            ScanOutcome::Accepted { index, score } => {
                let identity = scan.gallery[index].clone();
                info!(
                    "[{}] match found: identity {} (score {}) in {:?}",
                    request,
                    identity.identity_id,
                    score,
                    started.elapsed()
                );
                MatchDecision::Matched { identity, score }
            }
            ScanOutcome::Exhausted => {
                info!("[{}] no matching identity", request);
                MatchDecision::NoMatch
            }
            ScanOutcome::Stopped => {
                // Workers only quit early on expiry or a panic.
                for handle in handles {
                    if let Err(payload) = handle.join() {
                        panic::resume_unwind(payload);
                    }
                }
                timed_out(request, started)
            }
            ScanOutcome::Expired => timed_out(request, started),
        }
    }
}

fn timed_out(request: Uuid, started: Instant) -> MatchDecision {
    warn!(
        "[{}] deadline expired after {:?}",
        request,
        started.elapsed()
    );
    MatchDecision::TimedOut
}

/// Run `job` on its own thread and wait for it until `deadline`.
///
/// `None` means the deadline passed first. The job is left to finish on its
/// own and its result is dropped.
fn bounded<T, F>(deadline: Option<Instant>, job: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(deadline) = deadline else {
        return Some(job());
    };
    if Instant::now() >= deadline {
        return None;
    }

    let (done, finished) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("identify-fetch".to_string())
        .spawn(move || {
            // The receiver is gone if the caller already timed out.
            let _ = done.send(job());
        });
    let handle = match spawned {
        Ok(handle) => handle,
        Err(err) => {
            error!("could not start fetch thread: {}", err);
            return None;
        }
    };

    match finished.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(value) => Some(value),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => None,
        },
    }
}

enum ScanOutcome {
    Accepted { index: usize, score: i32 },
    Exhausted,
    /// The deadline passed with the answer still open.
    Expired,
    /// Every worker quit before the answer was settled.
    Stopped,
}

/// A gallery index and its score; `None` when the entry was skipped.
type Scored = (usize, Option<i32>);

/// Per-request scan state, owned jointly by the caller and the scan workers.
struct Scan<B: TemplateBuilder, C> {
    matcher: Arc<Matcher<B, C>>,
    cache: Option<Arc<TemplateCache<B::Template>>>,
    probe: B::Template,
    gallery: Vec<EnrolledIdentity>,
    request: Uuid,
    deadline: Option<Instant>,
    first_match: bool,
    cursor: AtomicUsize,
    /// Lowest accepted index under first-match.
    cutoff: AtomicUsize,
    stopped: AtomicBool,
}

impl<B, C> Scan<B, C>
where
    B: TemplateBuilder + Send + Sync + 'static,
    B::Template: Send + Sync + 'static,
    C: Comparator<B::Template> + Send + Sync + 'static,
{
    fn halted(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn spawn_workers(
        self: &Arc<Self>,
        workers: usize,
        results: Sender<Scored>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let scan = Arc::clone(self);
            let results = results.clone();
            let spawned = thread::Builder::new()
                .name(format!("scan-{worker}"))
                .spawn(move || scan.work(results));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(
                    "[{}] could not start scan worker {}: {}",
                    self.request, worker, err
                ),
            }
        }
        if handles.is_empty() {
            self.work(results);
        }
        handles
    }

    /// Claim gallery indices in order and report each one.
    ///
    /// Under first-match, an accepted index cancels every later index, so the
    /// answer is the entry a sequential scan would have returned.
    fn work(&self, results: Sender<Scored>) {
        let threshold = self.matcher.threshold();
        // Expiry is checked before claiming so every claimed index is reported.
        while !self.halted() {
            let index = self.cursor.fetch_add(1, Ordering::AcqRel);
            if index >= self.gallery.len()
                || (self.first_match && index > self.cutoff.load(Ordering::Acquire))
            {
                break;
            }
            let score = self.evaluate(&self.gallery[index]);
            if self.first_match && score.is_some_and(|score| threshold.accepts(score)) {
                self.cutoff.fetch_min(index, Ordering::AcqRel);
            }
            if results.send((index, score)).is_err() {
                break;
            }
        }
    }

    /// Gather reports until the answer is settled or the deadline passes.
    ///
    /// A first-match answer is settled once every earlier index has reported,
    /// without waiting on later indices still in flight.
    fn collect(&self, received: Receiver<Scored>) -> ScanOutcome {
        let threshold = self.matcher.threshold();
        let len = self.gallery.len();
        let mut reported = vec![false; len];
        let mut settled = 0;
        let mut pending = len;
        let mut chosen: Option<(usize, i32)> = None;

        loop {
            if let Some((index, score)) = chosen {
                if self.first_match && settled >= index {
                    return ScanOutcome::Accepted { index, score };
                }
            }
            if pending == 0 {
                return match chosen {
                    Some((index, score)) => ScanOutcome::Accepted { index, score },
                    None => ScanOutcome::Exhausted,
                };
            }

            let next = match self.deadline {
                Some(deadline) => {
                    received.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => received.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let (index, score) = match next {
                Ok(scored) => scored,
                Err(RecvTimeoutError::Timeout) => return ScanOutcome::Expired,
                Err(RecvTimeoutError::Disconnected) => return ScanOutcome::Stopped,
            };

            reported[index] = true;
            pending -= 1;
            while settled < len && reported[settled] {
                settled += 1;
            }

            let Some(score) = score.filter(|&score| threshold.accepts(score)) else {
                continue;
            };
            let better = match chosen {
                None => true,
                Some((current, _)) if self.first_match => index < current,
                // Ties go to the earlier entry.
                Some((current, lowest)) => (score, index) < (lowest, current),
            };
            if better {
                chosen = Some((index, score));
            }
        }
    }

    /// Score one gallery entry. `None` means the entry was skipped.
    fn evaluate(&self, entry: &EnrolledIdentity) -> Option<i32> {
        let id = entry.identity_id;
        let Some(envelope) = entry.enrolled_envelope() else {
            debug!("[{}] identity {} has no stored fingerprint", self.request, id);
            return None;
        };

        let candidate = match self.candidate(id, envelope) {
            Ok(template) => template,
            Err(err) => {
                warn!(
                    "[{}] invalid stored fingerprint for identity {}: {}",
                    self.request, id, err
                );
                return None;
            }
        };

        match self.matcher.compare(&self.probe, &candidate) {
            Ok(score) => {
                debug!(
                    "[{}] identity {}: score {} (threshold {})",
                    self.request,
                    id,
                    score,
                    self.matcher.threshold().value()
                );
                Some(score)
            }
            Err(err) => {
                warn!(
                    "[{}] comparison against identity {} failed: {}",
                    self.request, id, err
                );
                None
            }
        }
    }

    fn candidate(
        &self,
        id: i64,
        envelope: &CaptureEnvelope,
    ) -> Result<Arc<B::Template>, SampleError> {
        match &self.cache {
            Some(cache) => cache.get_or_build(id, envelope, || self.matcher.prepare(envelope)),
            None => self.matcher.prepare(envelope).map(Arc::new),
        }
    }
}
