use image::{imageops::FilterType, GrayImage};
use log::debug;
use ndarray::Array2;

use crate::template::{
    Comparator, ComparatorError, TemplateBuilder, TemplateError, TemplateInput, PROBABILITY_ONE,
};

const THUMBNAIL_SIZE: u32 = 64;

/// Correlation template: a mean-centered, L2-normalized grayscale thumbnail.
#[derive(Debug, Clone)]
pub struct CorrelationTemplate {
    pub vector: Array2<f32>,
}

/// Reference engine that scores samples by normalized image correlation.
///
/// Stands in for a vendor matching engine. It is deterministic and symmetric
/// but is not a minutiae matcher.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationEngine {
    size: u32,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            size: THUMBNAIL_SIZE,
        }
    }
}

impl CorrelationEngine {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl TemplateBuilder for CorrelationEngine {
    type Template = CorrelationTemplate;

    fn build(&self, input: TemplateInput) -> Result<CorrelationTemplate, TemplateError> {
        let expected = input.pixel_count();
        if input.image_bytes.len() < expected {
            return Err(TemplateError::Dimensions {
                width: input.width,
                height: input.height,
                expected,
                actual: input.image_bytes.len(),
            });
        }

        // Raw captures are 8-bit grayscale; trailing bytes are padding.
        let mut pixels = input.image_bytes;
        pixels.truncate(expected);
        let image = GrayImage::from_raw(input.width, input.height, pixels).ok_or_else(|| {
            TemplateError::Rejected("raw image does not fit its dimensions".to_string())
        })?;
        let thumb = image::imageops::resize(&image, self.size, self.size, FilterType::Triangle);

        let values: Vec<f64> = thumb.as_raw().iter().map(|&p| p as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
        let norm = centered.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm <= f64::EPSILON {
            return Err(TemplateError::Rejected(
                "sample has no contrast to correlate".to_string(),
            ));
        }

        let len = centered.len();
        let normalized: Vec<f32> = centered.into_iter().map(|x| (x / norm) as f32).collect();
        let vector = Array2::from_shape_vec((1, len), normalized)
            .map_err(|err| TemplateError::Rejected(err.to_string()))?;
        debug!(
            "built {}x{} correlation template from {}x{} sample at {} dpi",
            self.size, self.size, input.width, input.height, input.dpi
        );

        Ok(CorrelationTemplate { vector })
    }
}

impl Comparator<CorrelationTemplate> for CorrelationEngine {
    fn compare(
        &self,
        probe: &CorrelationTemplate,
        candidate: &CorrelationTemplate,
    ) -> Result<i32, ComparatorError> {
        if probe.vector.len() != candidate.vector.len() {
            return Err(ComparatorError(format!(
                "template length mismatch: {} vs {}",
                probe.vector.len(),
                candidate.vector.len()
            )));
        }
        Ok(dissimilarity(correlation(probe, candidate)))
    }
}

/// Pearson correlation of two templates, in `[-1, 1]`.
pub fn correlation(a: &CorrelationTemplate, b: &CorrelationTemplate) -> f64 {
    let dot: f64 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum();
    dot.clamp(-1.0, 1.0)
}

/// Map a correlation onto the probability scale: 1.0 -> 0, -1.0 -> PROBABILITY_ONE.
fn dissimilarity(correlation: f64) -> i32 {
    let scaled = ((1.0 - correlation) / 2.0 * PROBABILITY_ONE as f64).round();
    scaled.clamp(0.0, PROBABILITY_ONE as f64) as i32
}
