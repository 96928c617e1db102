mod common;

use anyhow::Result;
use common::identity;
use printmatch::gallery::save_snapshot;
use printmatch::{
    CaptureEnvelope, CorrelationEngine, FileGallery, Identifier, MatchDecision, MatchSettings,
    TemplateInput,
};
use tempfile::TempDir;

/// Synthetic ridge pattern: stripes along `(x * dx + y * dy)` with the given period.
fn ridges(dx: u32, dy: u32, period: u32) -> TemplateInput {
    let size = 96;
    let mut image_bytes = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = ((x * dx + y * dy) / period) % 2 == 0;
            image_bytes.push(if on { 210 } else { 40 });
        }
    }
    TemplateInput {
        image_bytes,
        width: size,
        height: size,
        dpi: 500,
    }
}

#[test]
fn identifies_enrolled_capture_from_snapshot() -> Result<()> {
    env_logger::try_init().ok();
    let tmp = TempDir::new()?;
    let path = tmp.path().join("gallery.json");

    let horizontal = CaptureEnvelope::encode(&ridges(0, 1, 8));
    let vertical = CaptureEnvelope::encode(&ridges(1, 0, 8));
    save_snapshot(
        &path,
        &[
            identity(1, None),
            identity(2, Some(horizontal)),
            identity(3, Some(vertical.clone())),
        ],
    )?;

    let engine = CorrelationEngine::default();
    let identifier = Identifier::new(
        FileGallery::new(&path),
        engine,
        engine,
        MatchSettings::default(),
    )
    .with_template_cache();

    let decision = identifier.identify(&vertical);
    assert_eq!(decision.identity().map(|i| i.identity_id), Some(3));

    let diagonal = CaptureEnvelope::encode(&ridges(1, 1, 8));
    assert!(matches!(identifier.identify(&diagonal), MatchDecision::NoMatch));
    Ok(())
}

#[test]
fn missing_snapshot_is_reported_as_unavailable() {
    let tmp = TempDir::new().unwrap();
    let engine = CorrelationEngine::default();
    let identifier = Identifier::new(
        FileGallery::new(tmp.path().join("absent.bin")),
        engine,
        engine,
        MatchSettings::default(),
    );

    let decision = identifier.identify(&CaptureEnvelope::encode(&ridges(1, 0, 8)));
    assert!(matches!(decision, MatchDecision::Unavailable(_)));
}
