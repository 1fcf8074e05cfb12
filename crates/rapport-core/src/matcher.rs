//! Nearest-reference matcher over the enrollment gallery.
//!
//! A probe is compared against every reference embedding of every enrolled
//! identity (linear scan, no index). The global minimum distance wins; a
//! match is only accepted strictly below the configured threshold.

use crate::types::{Embedding, Identity, MatchResult};

/// Default Euclidean distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// A flattened `(identity, reference)` pair in enrollment order.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub embedding: Embedding,
}

/// Flatten identities into gallery entries, preserving enrollment order.
///
/// Order matters: equal-minimum ties resolve to the first entry
/// encountered, so the gallery order defines the tie-break.
pub fn build_gallery(identities: &[Identity]) -> Vec<GalleryEntry> {
    identities
        .iter()
        .flat_map(|identity| {
            identity.reference_embeddings.iter().map(|emb| GalleryEntry {
                identity_id: identity.id.clone(),
                embedding: emb.clone(),
            })
        })
        .collect()
}

/// Strategy for resolving a probe embedding to an enrolled identity.
pub trait Matcher {
    fn match_probe(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchResult;
}

/// Euclidean nearest-reference matcher.
///
/// Stateless; safe to call from concurrent probes once the gallery is
/// built. Ties (equal minimum distance across two identities) resolve to
/// the first entry in enrollment order — a deliberate arbitrary tie-break,
/// not an error.
#[derive(Debug, Clone)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for EuclideanMatcher {
    fn match_probe(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            // Strict `<` keeps the first entry on an exact tie.
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance < self.threshold => {
                tracing::trace!(
                    identity = %gallery[idx].identity_id,
                    distance = best_distance,
                    "probe resolved"
                );
                MatchResult {
                    identity_id: Some(gallery[idx].identity_id.clone()),
                    distance: best_distance,
                }
            }
            _ => {
                tracing::trace!(distance = best_distance, "probe unknown");
                MatchResult::unknown(best_distance)
            }
        }
    }
}
