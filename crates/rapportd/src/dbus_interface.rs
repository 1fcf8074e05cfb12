//! D-Bus control surface for the Rapport daemon.
//!
//! Bus name: org.rapport.Rapport1
//! Object path: /org/rapport/Rapport1

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use zbus::interface;

use crate::engine::EngineShared;

/// Control surface handlers. The engine slot is installed once
/// enrollment completes; until then every call fails with NotReady.
pub struct RapportService {
    shared: Arc<OnceLock<Arc<EngineShared>>>,
}

impl RapportService {
    pub fn new(shared: Arc<OnceLock<Arc<EngineShared>>>) -> Self {
        Self { shared }
    }

    fn engine(&self) -> zbus::fdo::Result<Arc<EngineShared>> {
        self.shared.get().cloned().ok_or_else(|| {
            zbus::fdo::Error::Failed("not ready: enrollment has not completed".into())
        })
    }
}

#[interface(name = "org.rapport.Rapport1")]
impl RapportService {
    /// Select the owner role. Takes effect on the next tick.
    /// Returns false (and logs) when the identity is not enrolled.
    async fn set_owner(&self, id: &str) -> zbus::fdo::Result<bool> {
        let engine = self.engine()?;
        if !engine.enrollment.contains(id) {
            tracing::warn!(id, "set_owner rejected: identity not enrolled");
            return Ok(false);
        }
        if id == engine.classifier.target_id {
            tracing::warn!(id, "owner set to the target identity; qualifying ticks will self-pair");
        }
        engine.set_owner(Some(id.to_string()));
        tracing::info!(id, "owner changed");
        Ok(true)
    }

    /// Unset the owner role; the classifier goes inactive next tick.
    async fn clear_owner(&self) -> zbus::fdo::Result<()> {
        let engine = self.engine()?;
        engine.set_owner(None);
        tracing::info!("owner cleared");
        Ok(())
    }

    /// Current owner id, or empty when unset.
    async fn get_owner(&self) -> zbus::fdo::Result<String> {
        Ok(self.engine()?.owner().unwrap_or_default())
    }

    /// Consistent point-in-time copy of all aggregate edges, as JSON.
    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine()?;
        serde_json::to_string(&engine.aggregate.snapshot())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Enrolled identities as JSON (id, name, reference count).
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine()?;
        let identities: Vec<serde_json::Value> = engine
            .enrollment
            .identities()
            .iter()
            .map(|i| {
                serde_json::json!({
                    "id": i.id,
                    "name": i.display_name,
                    "references": i.reference_embeddings.len(),
                })
            })
            .collect();
        serde_json::to_string(&identities).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Daemon status: roles, enrollment size, tick counters.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = match self.shared.get() {
            Some(engine) => serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "ready": true,
                "enrolled": engine.enrollment.identities().len(),
                "owner": engine.owner(),
                "target": engine.classifier.target_id,
                "last_outcome": engine.last_outcome(),
                "ticks": engine.counters.ticks.load(Ordering::Relaxed),
                "ticks_skipped": engine.counters.skipped.load(Ordering::Relaxed),
                "events": engine.counters.events.load(Ordering::Relaxed),
                "detection_failures": engine.counters.detection_failures.load(Ordering::Relaxed),
                "events_suppressed": engine.counters.suppressed.load(Ordering::Relaxed),
            }),
            None => serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "ready": false,
            }),
        };
        Ok(status.to_string())
    }
}
