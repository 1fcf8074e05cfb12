//! Enrollment store — reference embeddings per known identity.
//!
//! Built once at startup from the identity roster; read-only afterwards.

use std::io::Cursor;
use std::path::PathBuf;

use image::ImageFormat;
use rapport_core::matcher::{build_gallery, GalleryEntry};
use rapport_core::source::EmbeddingExtractor;
use rapport_core::types::Identity;
use serde::Deserialize;
use thiserror::Error;

/// Reference photos larger than this (long side, pixels) are downscaled
/// before extraction.
const MAX_REFERENCE_DIM: u32 = 640;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("no identities could be enrolled — system would be non-functional")]
    NoneEnrolled,
    #[error("roster: {0}")]
    Roster(String),
}

/// One identity roster entry: id, display name, reference image paths.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub images: Vec<PathBuf>,
}

/// Parse a JSON roster file supplied by the external identity directory.
pub fn load_roster(path: &std::path::Path) -> Result<Vec<RosterEntry>, EnrollError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EnrollError::Roster(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| EnrollError::Roster(e.to_string()))
}

/// Read-only store of enrolled identities and their flattened gallery.
pub struct EnrollmentStore {
    identities: Vec<Identity>,
    gallery: Vec<GalleryEntry>,
}

impl EnrollmentStore {
    /// Enroll every roster entry by extracting embeddings from its
    /// reference images.
    ///
    /// An identity whose images yield no extractable embedding is dropped
    /// with a warning, not a fatal error. Fails with [`EnrollError::NoneEnrolled`]
    /// only when nothing at all survives — the run would be non-functional.
    pub fn load(
        roster: &[RosterEntry],
        extractor: &dyn EmbeddingExtractor,
    ) -> Result<Self, EnrollError> {
        let mut identities = Vec::with_capacity(roster.len());

        for entry in roster {
            let mut references = Vec::new();
            for path in &entry.images {
                let bytes = match normalize_image(path) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(
                            identity = %entry.id,
                            image = %path.display(),
                            error = %err,
                            "skipping unreadable reference image"
                        );
                        continue;
                    }
                };
                match extractor.extract(&bytes) {
                    Ok(Some(embedding)) => references.push(embedding),
                    Ok(None) => {
                        tracing::warn!(
                            identity = %entry.id,
                            image = %path.display(),
                            "no usable face in reference image"
                        );
                    }
                    // Per-image extractor failures are contained; only a
                    // run with zero enrolled identities is fatal.
                    Err(err) => {
                        tracing::warn!(
                            identity = %entry.id,
                            image = %path.display(),
                            error = %err,
                            "embedding extraction failed for reference image"
                        );
                    }
                }
            }

            if references.is_empty() {
                tracing::warn!(
                    identity = %entry.id,
                    name = %entry.name,
                    "dropping identity with no extractable embeddings"
                );
                continue;
            }

            tracing::info!(
                identity = %entry.id,
                name = %entry.name,
                references = references.len(),
                "identity enrolled"
            );
            identities.push(Identity {
                id: entry.id.clone(),
                display_name: entry.name.clone(),
                reference_embeddings: references,
            });
        }

        if identities.is_empty() {
            return Err(EnrollError::NoneEnrolled);
        }

        let gallery = build_gallery(&identities);
        Ok(Self {
            identities,
            gallery,
        })
    }

    /// Build a store from identities whose embeddings are already known
    /// (precomputed galleries, tests).
    pub fn from_identities(identities: Vec<Identity>) -> Result<Self, EnrollError> {
        if identities.is_empty() {
            return Err(EnrollError::NoneEnrolled);
        }
        let gallery = build_gallery(&identities);
        Ok(Self {
            identities,
            gallery,
        })
    }

    pub fn get(&self, id: &str) -> Result<&Identity, EnrollError> {
        self.identities
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| EnrollError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.identities.iter().any(|i| i.id == id)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Flattened `(identity, reference)` pairs in enrollment order.
    pub fn gallery(&self) -> &[GalleryEntry] {
        &self.gallery
    }
}

/// Decode a reference photo, downscale oversized images, re-encode as PNG.
fn normalize_image(path: &std::path::Path) -> Result<Vec<u8>, String> {
    let img = image::open(path).map_err(|e| e.to_string())?;
    let img = if img.width().max(img.height()) > MAX_REFERENCE_DIM {
        img.resize(
            MAX_REFERENCE_DIM,
            MAX_REFERENCE_DIM,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_core::source::ExtractError;
    use rapport_core::types::Embedding;

    /// Test extractor: reads the red channel of the top-left pixel.
    /// Red 0 simulates "no usable face".
    struct PixelExtractor;

    impl EmbeddingExtractor for PixelExtractor {
        fn extract(&self, image: &[u8]) -> Result<Option<Embedding>, ExtractError> {
            let img = image::load_from_memory(image)
                .map_err(|e| ExtractError::BadImage(e.to_string()))?;
            let red = img.to_rgb8().get_pixel(0, 0)[0];
            if red == 0 {
                Ok(None)
            } else {
                Ok(Some(Embedding {
                    values: vec![red as f32],
                }))
            }
        }
    }

    fn write_test_png(red: u8) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rapport-enroll-{}-{red}.png",
            uuid::Uuid::new_v4()
        ));
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([red, 0, 0]));
        img.save(&path).unwrap();
        path
    }

    fn entry(id: &str, reds: &[u8]) -> (RosterEntry, Vec<PathBuf>) {
        let images: Vec<PathBuf> = reds.iter().map(|&r| write_test_png(r)).collect();
        (
            RosterEntry {
                id: id.into(),
                name: id.to_uppercase(),
                images: images.clone(),
            },
            images,
        )
    }

    fn cleanup(paths: &[PathBuf]) {
        for p in paths {
            let _ = std::fs::remove_file(p);
        }
    }

    #[test]
    fn test_load_enrolls_identities_in_order() {
        let (a, pa) = entry("a", &[10]);
        let (b, pb) = entry("b", &[20, 30]);
        let store = EnrollmentStore::load(&[a, b], &PixelExtractor).unwrap();

        assert_eq!(store.identities().len(), 2);
        assert_eq!(store.identities()[0].id, "a");
        assert_eq!(store.identities()[1].reference_embeddings.len(), 2);
        // Gallery is flattened in enrollment order.
        assert_eq!(store.gallery().len(), 3);
        assert_eq!(store.gallery()[0].identity_id, "a");
        assert_eq!(store.gallery()[1].identity_id, "b");

        cleanup(&pa);
        cleanup(&pb);
    }

    #[test]
    fn test_identity_without_face_is_dropped() {
        let (a, pa) = entry("a", &[10]);
        let (blank, pb) = entry("blank", &[0]);
        let store = EnrollmentStore::load(&[a, blank], &PixelExtractor).unwrap();

        assert_eq!(store.identities().len(), 1);
        assert!(store.contains("a"));
        assert!(!store.contains("blank"));

        cleanup(&pa);
        cleanup(&pb);
    }

    #[test]
    fn test_zero_enrolled_is_startup_error() {
        let (blank, pb) = entry("blank", &[0]);
        let result = EnrollmentStore::load(&[blank], &PixelExtractor);
        assert!(matches!(result, Err(EnrollError::NoneEnrolled)));
        cleanup(&pb);
    }

    #[test]
    fn test_missing_image_is_skipped_not_fatal() {
        let (mut a, pa) = entry("a", &[10]);
        a.images.push(PathBuf::from("/nonexistent/rapport-test.png"));
        let store = EnrollmentStore::load(&[a], &PixelExtractor).unwrap();
        assert_eq!(store.get("a").unwrap().reference_embeddings.len(), 1);
        cleanup(&pa);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let (a, pa) = entry("a", &[10]);
        let store = EnrollmentStore::load(&[a], &PixelExtractor).unwrap();
        assert!(matches!(
            store.get("nobody"),
            Err(EnrollError::NotFound(_))
        ));
        cleanup(&pa);
    }
}
