use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use printmatch_engine::CaptureEnvelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One enrolled person and the capture they enrolled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub identity_id: i64,
    pub display_name: String,
    #[serde(default)]
    pub stored_envelope: Option<CaptureEnvelope>,
    pub external_account_id: i64,
    pub external_username: String,
    pub external_role: String,
}

impl EnrolledIdentity {
    /// Stored envelope, unless the identity is not enrolled for fingerprints.
    pub fn enrolled_envelope(&self) -> Option<&CaptureEnvelope> {
        self.stored_envelope.as_ref().filter(|e| !e.is_blank())
    }
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("gallery {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("gallery {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("gallery backend failed: {0}")]
    Backend(String),
}

/// Source of the enrolled identities, fetched fresh for every request.
pub trait GalleryProvider {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError>;
}

impl<G: GalleryProvider + ?Sized> GalleryProvider for &G {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        (**self).fetch_all()
    }
}

impl<G: GalleryProvider + ?Sized> GalleryProvider for Arc<G> {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        (**self).fetch_all()
    }
}

/// Gallery snapshot on disk: JSON for `.json` files, postcard otherwise.
#[derive(Debug, Clone)]
pub struct FileGallery {
    path: PathBuf,
}

impl FileGallery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GalleryProvider for FileGallery {
    fn fetch_all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        load_snapshot(&self.path)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

pub fn load_snapshot(path: &Path) -> Result<Vec<EnrolledIdentity>, GalleryError> {
    let data = std::fs::read(path).map_err(|source| GalleryError::Unavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let corrupt = |message: String| GalleryError::Corrupt {
        path: path.to_path_buf(),
        message,
    };
    if is_json(path) {
        serde_json::from_slice(&data).map_err(|err| corrupt(err.to_string()))
    } else {
        postcard::from_bytes(&data).map_err(|err| corrupt(err.to_string()))
    }
}

pub fn save_snapshot(path: &Path, identities: &[EnrolledIdentity]) -> Result<(), GalleryError> {
    let corrupt = |message: String| GalleryError::Corrupt {
        path: path.to_path_buf(),
        message,
    };
    let data = if is_json(path) {
        serde_json::to_vec_pretty(identities).map_err(|err| corrupt(err.to_string()))?
    } else {
        postcard::to_allocvec(identities).map_err(|err| corrupt(err.to_string()))?
    };

    let unavailable = |source: io::Error| GalleryError::Unavailable {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(unavailable)?;
    }
    std::fs::write(path, data).map_err(unavailable)?;
    info!("wrote {} identities to {}", identities.len(), path.display());
    Ok(())
}
