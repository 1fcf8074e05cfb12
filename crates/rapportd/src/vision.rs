//! D-Bus client for the external vision service.
//!
//! The embedding model and the frame/detector pipeline live outside this
//! daemon, behind `org.rapport.Vision1`. This module adapts that service
//! to the core [`EmbeddingExtractor`] and [`ProbeSource`] seams.
//!
//! Wire format: `DetectAll` returns a JSON array of probes
//! `[{"embedding": [f32...], "expressions": {"happy": 0.9, ...}}]`;
//! `Extract` returns a JSON embedding array, or `null` when the image
//! holds no usable face.

use rapport_core::source::{EmbeddingExtractor, ExtractError, ProbeSource, SampleError};
use rapport_core::types::{Embedding, Probe};

// `#[zbus::proxy]` generates both async and blocking variants; only the
// blocking one is used, since detection cycles run on the blocking pool.
#[zbus::proxy(
    interface = "org.rapport.Vision1",
    default_service = "org.rapport.Vision1",
    default_path = "/org/rapport/Vision1"
)]
trait Vision {
    /// Grab the current frame and detect all faces in it.
    async fn detect_all(&self) -> zbus::Result<String>;

    /// Extract an embedding from an encoded image.
    async fn extract(&self, image: &[u8]) -> zbus::Result<String>;
}

/// Blocking client for the vision service.
pub struct VisionClient {
    proxy: VisionProxyBlocking<'static>,
}

impl VisionClient {
    /// Connect over the session bus. Method calls are bounded so a stuck
    /// vision service cannot wedge a detection cycle forever.
    pub fn connect() -> Result<Self, zbus::Error> {
        let conn = zbus::blocking::connection::Builder::session()?
            .method_timeout(std::time::Duration::from_secs(10))
            .build()?;
        let proxy = VisionProxyBlocking::new(&conn)?;
        Ok(Self { proxy })
    }
}

impl ProbeSource for VisionClient {
    fn sample(&self) -> Result<Vec<Probe>, SampleError> {
        let raw = self
            .proxy
            .detect_all()
            .map_err(|e| SampleError(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| SampleError(format!("bad probe payload: {e}")))
    }
}

impl EmbeddingExtractor for VisionClient {
    fn extract(&self, image: &[u8]) -> Result<Option<Embedding>, ExtractError> {
        let raw = self
            .proxy
            .extract(image)
            .map_err(|e| ExtractError::Unavailable(e.to_string()))?;
        serde_json::from_str::<Option<Embedding>>(&raw)
            .map_err(|e| ExtractError::BadImage(format!("bad embedding payload: {e}")))
    }
}
