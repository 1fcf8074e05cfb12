use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use rapport_core::classifier::InteractionClassifier;
use rapport_core::matcher::EuclideanMatcher;
use rapport_core::source::ProbeSource;
use rapport_core::weight::WeightPolicy;
use rapport_store::{AggregationStore, EnrollmentStore, Mirror};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod vision;

use config::Config;
use dbus_interface::RapportService;
use engine::EngineShared;
use vision::VisionClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rapportd starting");

    let config = Config::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }
    let mirror = Mirror::open(&config.db_path)
        .with_context(|| format!("opening mirror at {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "mirror opened");

    // Serve the control surface immediately; calls fail with NotReady
    // until the engine slot is installed below.
    let slot: Arc<OnceLock<Arc<EngineShared>>> = Arc::new(OnceLock::new());
    let _conn = zbus::connection::Builder::session()?
        .name("org.rapport.Rapport1")?
        .serve_at("/org/rapport/Rapport1", RapportService::new(Arc::clone(&slot)))?
        .build()
        .await
        .context("registering org.rapport.Rapport1 on the session bus")?;
    tracing::info!("control surface registered");

    // Enrollment runs over the blocking vision client; embedding
    // extraction per reference image can take a while.
    let roster_path = config.roster_path.clone();
    let (vision, enrollment) = tokio::task::spawn_blocking(move || -> Result<_> {
        let vision = VisionClient::connect().context("connecting to org.rapport.Vision1")?;
        let roster = rapport_store::load_roster(&roster_path)
            .with_context(|| format!("loading roster {}", roster_path.display()))?;
        tracing::info!(entries = roster.len(), "roster loaded");
        let enrollment =
            EnrollmentStore::load(&roster, &vision).context("enrolling identities")?;
        Ok((vision, enrollment))
    })
    .await??;

    let enrollment = Arc::new(enrollment);
    tracing::info!(
        enrolled = enrollment.identities().len(),
        references = enrollment.gallery().len(),
        "enrollment complete"
    );

    if !enrollment.contains(&config.target_id) {
        tracing::warn!(
            target = %config.target_id,
            "target identity is not enrolled; no tick can qualify until it is"
        );
    }

    let aggregate = Arc::new(AggregationStore::new(
        enrollment.identities().iter().map(|i| i.id.clone()),
    ));

    // Resume prior totals, skipping pairs that are no longer enrolled.
    let mut resumed = 0usize;
    for edge in mirror.load_edges().context("reading mirrored edges")? {
        if enrollment.contains(&edge.sender_id) && enrollment.contains(&edge.receiver_id) {
            aggregate.seed(&edge.sender_id, &edge.receiver_id, edge.cumulative_weight);
            resumed += 1;
        } else {
            tracing::debug!(
                sender = %edge.sender_id,
                receiver = %edge.receiver_id,
                "mirrored edge references unenrolled identity; not resumed"
            );
        }
    }
    tracing::info!(edges = resumed, "aggregate seeded from mirror");

    let shared = Arc::new(EngineShared::new(
        enrollment,
        EuclideanMatcher::new(config.match_threshold),
        InteractionClassifier::new(
            config.target_id.clone(),
            WeightPolicy {
                positive: config.positive_label,
                high: config.weight_high,
                low: config.weight_low,
            },
        ),
        aggregate,
        config.owner_id.clone(),
        Duration::from_millis(config.event_cooldown_ms),
    ));
    slot.set(Arc::clone(&shared))
        .map_err(|_| anyhow::anyhow!("engine slot already installed"))?;

    let sampler = engine::spawn_sampler(
        shared,
        Arc::new(vision) as Arc<dyn ProbeSource>,
        Some(Arc::new(Mutex::new(mirror))),
        Duration::from_millis(config.tick_period_ms),
    );

    tracing::info!("rapportd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rapportd shutting down");
    sampler.shutdown().await;

    Ok(())
}
