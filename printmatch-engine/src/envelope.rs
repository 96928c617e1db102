use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::template::TemplateInput;

const PREVIEW_CHARS: usize = 100;

// Capture clients may drop trailing padding, so decoding accepts it either way.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Wire payload of one fingerprint capture as delivered by the capture client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureEnvelope(String);

impl CaptureEnvelope {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// An empty or whitespace-only payload means "not enrolled", not "malformed".
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Wrap a sample the same way the capture client does.
    pub fn encode(input: &TemplateInput) -> Self {
        let sample = json!({
            "Format": {
                "iWidth": input.width,
                "iHeight": input.height,
                "iXdpi": input.dpi,
                "iYdpi": input.dpi,
            },
            "Data": encode_urlsafe(&input.image_bytes),
        })
        .to_string();

        let outer = json!({ "Data": encode_urlsafe(sample.as_bytes()) });
        Self(outer.to_string())
    }
}

impl From<String> for CaptureEnvelope {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for CaptureEnvelope {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Outer,
    Inner,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Outer => f.write_str("outer envelope"),
            Layer::Inner => f.write_str("inner sample"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is missing the `{field}` field")]
    MissingField { field: &'static str },

    #[error("`{field}` is not valid envelope base64: {reason}")]
    InvalidEncoding { field: &'static str, reason: String },

    #[error("{layer} is not valid JSON: {source}")]
    InvalidJson {
        layer: Layer,
        #[source]
        source: serde_json::Error,
    },

    #[error("sample format lacks a usable {detail}")]
    MissingFormat { detail: &'static str },
}

#[derive(Deserialize)]
struct OuterEnvelope {
    #[serde(rename = "Data")]
    data: Option<String>,
}

#[derive(Deserialize)]
struct RawSample {
    #[serde(rename = "Format")]
    format: Option<SampleFormat>,
    #[serde(rename = "Data")]
    data: Option<String>,
}

#[derive(Deserialize)]
struct SampleFormat {
    #[serde(rename = "iWidth")]
    width: Option<i64>,
    #[serde(rename = "iHeight")]
    height: Option<i64>,
    #[serde(rename = "iXdpi")]
    dpi: Option<i64>,
}

/// Decode a capture envelope into the sample it carries.
///
/// The envelope is a JSON object whose `Data` field is URL-safe base64 (with
/// `.` as padding) of a second JSON document. That document carries the
/// `Format` dimensions and the image bytes in the same encoding.
pub fn decode(envelope: &CaptureEnvelope) -> Result<TemplateInput, DecodeError> {
    let raw = envelope.as_str();
    debug!("decoding envelope of {} chars: {}", raw.len(), preview(raw));

    let outer: OuterEnvelope =
        serde_json::from_str(raw).map_err(|source| DecodeError::InvalidJson {
            layer: Layer::Outer,
            source,
        })?;
    let data = outer
        .data
        .ok_or(DecodeError::MissingField { field: "Data" })?;

    let inner = decode_urlsafe(&data).map_err(|err| DecodeError::InvalidEncoding {
        field: "Data",
        reason: err.to_string(),
    })?;
    debug!(
        "inner sample document: {}",
        preview(&String::from_utf8_lossy(&inner))
    );

    let sample: RawSample =
        serde_json::from_slice(&inner).map_err(|source| DecodeError::InvalidJson {
            layer: Layer::Inner,
            source,
        })?;

    let format = sample.format.ok_or(DecodeError::MissingFormat {
        detail: "Format object",
    })?;
    let width = positive(format.width, "Format.iWidth")?;
    let height = positive(format.height, "Format.iHeight")?;
    let dpi = positive(format.dpi, "Format.iXdpi")?;
    debug!("sample dimensions {}x{} at {} dpi", width, height, dpi);

    let image_data = sample
        .data
        .ok_or(DecodeError::MissingField { field: "Data.Data" })?;
    let image_bytes = decode_urlsafe(&image_data).map_err(|err| DecodeError::InvalidEncoding {
        field: "Data.Data",
        reason: err.to_string(),
    })?;
    if image_bytes.is_empty() {
        return Err(DecodeError::InvalidEncoding {
            field: "Data.Data",
            reason: "image data is empty".to_string(),
        });
    }
    debug!("decoded {} image bytes", image_bytes.len());

    Ok(TemplateInput {
        image_bytes,
        width,
        height,
        dpi,
    })
}

/// Map the envelope alphabet (`-`, `_`, `.`) onto standard base64 (`+`, `/`, `=`).
pub fn to_standard_alphabet(encoded: &str) -> String {
    encoded
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            '.' => '=',
            other => other,
        })
        .collect()
}

/// Inverse of [`to_standard_alphabet`].
pub fn to_urlsafe_alphabet(encoded: &str) -> String {
    encoded
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            '=' => '.',
            other => other,
        })
        .collect()
}

pub fn decode_urlsafe(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_LENIENT.decode(to_standard_alphabet(encoded))
}

pub fn encode_urlsafe(bytes: &[u8]) -> String {
    to_urlsafe_alphabet(&STANDARD_LENIENT.encode(bytes))
}

fn positive(value: Option<i64>, detail: &'static str) -> Result<u32, DecodeError> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or(DecodeError::MissingFormat { detail })
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
