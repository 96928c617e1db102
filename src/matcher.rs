use log::{debug, warn};
use printmatch_engine::{
    decode, CaptureEnvelope, Comparator, ComparatorError, DecodeError, TemplateBuilder,
    TemplateError, Threshold,
};
use serde::Serialize;
use thiserror::Error;

/// Why one envelope could not be turned into a template.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("undecodable envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("unusable sample: {0}")]
    Template(#[from] TemplateError),
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("stored sample: {0}")]
    Stored(#[source] SampleError),

    #[error("probe sample: {0}")]
    Probe(#[source] SampleError),

    #[error(transparent)]
    Compare(#[from] ComparatorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub score: i32,
    pub accepted: bool,
}

/// Template builder and comparator bound to one acceptance threshold.
pub struct Matcher<B, C> {
    builder: B,
    comparator: C,
    threshold: Threshold,
}

impl<B, C> Matcher<B, C>
where
    B: TemplateBuilder,
    C: Comparator<B::Template>,
{
    pub fn new(builder: B, comparator: C, threshold: Threshold) -> Self {
        Self {
            builder,
            comparator,
            threshold,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Decode an envelope and build its template.
    pub fn prepare(&self, envelope: &CaptureEnvelope) -> Result<B::Template, SampleError> {
        let input = decode(envelope)?;
        Ok(self.builder.build(input)?)
    }

    pub fn compare(
        &self,
        probe: &B::Template,
        candidate: &B::Template,
    ) -> Result<i32, ComparatorError> {
        self.comparator.compare(probe, candidate)
    }

    /// Whether the envelope can be used as a probe or enrollment sample.
    pub fn validate(&self, envelope: &CaptureEnvelope) -> bool {
        match self.prepare(envelope) {
            Ok(_) => true,
            Err(err) => {
                warn!("sample failed validation: {}", err);
                false
            }
        }
    }

    pub fn try_verify(
        &self,
        stored: &CaptureEnvelope,
        probe: &CaptureEnvelope,
    ) -> Result<Verification, MatchError> {
        let stored = self.prepare(stored).map_err(MatchError::Stored)?;
        let probe = self.prepare(probe).map_err(MatchError::Probe)?;
        let score = self.compare(&probe, &stored)?;
        let accepted = self.threshold.accepts(score);
        debug!(
            "verification score {} (threshold {}): {}",
            score,
            self.threshold.value(),
            if accepted { "accepted" } else { "rejected" }
        );
        Ok(Verification { score, accepted })
    }

    /// One-to-one check. Any failure reads as "not the same finger".
    pub fn verify(&self, stored: &CaptureEnvelope, probe: &CaptureEnvelope) -> bool {
        match self.try_verify(stored, probe) {
            Ok(verification) => verification.accepted,
            Err(err) => {
                warn!("verification failed closed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printmatch_engine::TemplateInput;

    struct FirstByte;

    impl TemplateBuilder for FirstByte {
        type Template = u8;

        fn build(&self, input: TemplateInput) -> Result<u8, TemplateError> {
            match input.image_bytes[0] {
                0xff => Err(TemplateError::Rejected("blank".to_string())),
                tag => Ok(tag),
            }
        }
    }

    struct Distance;

    impl Comparator<u8> for Distance {
        fn compare(&self, probe: &u8, candidate: &u8) -> Result<i32, ComparatorError> {
            Ok((*probe as i32 - *candidate as i32).abs() * 10)
        }
    }

    fn envelope(tag: u8) -> CaptureEnvelope {
        CaptureEnvelope::encode(&TemplateInput {
            image_bytes: vec![tag; 4],
            width: 2,
            height: 2,
            dpi: 500,
        })
    }

    #[test]
    fn verify_uses_strict_threshold() {
        let matcher = Matcher::new(FirstByte, Distance, Threshold::new(20));
        assert!(matcher.verify(&envelope(5), &envelope(6)));
        assert!(!matcher.verify(&envelope(5), &envelope(7)));
        assert_eq!(
            matcher.try_verify(&envelope(5), &envelope(7)).unwrap(),
            Verification {
                score: 20,
                accepted: false
            }
        );
    }

    #[test]
    fn verify_fails_closed_and_names_the_side() {
        let matcher = Matcher::new(FirstByte, Distance, Threshold::new(i32::MAX));
        let garbage = CaptureEnvelope::from("garbage");

        assert!(!matcher.verify(&garbage, &envelope(1)));
        assert!(matches!(
            matcher.try_verify(&garbage, &envelope(1)),
            Err(MatchError::Stored(SampleError::Decode(_)))
        ));
        assert!(matches!(
            matcher.try_verify(&envelope(1), &envelope(0xff)),
            Err(MatchError::Probe(SampleError::Template(_)))
        ));
    }

    #[test]
    fn validate_checks_decode_and_build() {
        let matcher = Matcher::new(FirstByte, Distance, Threshold::default());
        assert!(matcher.validate(&envelope(3)));
        assert!(!matcher.validate(&envelope(0xff)));
        assert!(!matcher.validate(&CaptureEnvelope::from(r#"{"Data":"e30."}"#)));
    }
}
