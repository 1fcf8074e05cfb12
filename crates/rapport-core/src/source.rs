//! External capability seams — the embedding extractor and the per-tick
//! probe source are collaborators living outside this workspace (an
//! external vision service). Only their contracts are defined here.

use crate::types::{Embedding, Probe};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extractor rejected image: {0}")]
    BadImage(String),
}

/// Transient failure of the frame source or detector on one tick.
///
/// The engine treats this as an empty sample, never as fatal.
#[derive(Error, Debug)]
#[error("detection failure: {0}")]
pub struct SampleError(pub String);

/// Turns an encoded image into a face embedding.
///
/// `Ok(None)` means "no usable face in this image" — an expected outcome,
/// not an error.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Option<Embedding>, ExtractError>;
}

/// Pulls the current video frame and runs detection, yielding zero or
/// more probes. Probe order is not meaningful.
pub trait ProbeSource: Send + Sync {
    fn sample(&self) -> Result<Vec<Probe>, SampleError>;
}
