//! Sampling engine — drives the tick cadence and the per-tick
//! sample → match → classify → weigh → apply pipeline.
//!
//! At most one detection cycle is ever in flight: a non-blocking atomic
//! guard makes an overlapping tick skip entirely instead of queuing.
//! A skipped tick's data is lost on purpose; the next tick is the retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rapport_core::classifier::{InteractionClassifier, Observation, TickOutcome};
use rapport_core::matcher::{EuclideanMatcher, Matcher};
use rapport_core::source::ProbeSource;
use rapport_store::{AggregationStore, EnrollmentStore, Mirror};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tick and event counters, exposed through the status surface.
#[derive(Default)]
pub struct Counters {
    pub ticks: AtomicU64,
    pub skipped: AtomicU64,
    pub events: AtomicU64,
    pub detection_failures: AtomicU64,
    pub suppressed: AtomicU64,
}

/// State shared between the sampler task, its detection cycles, and the
/// D-Bus control surface.
pub struct EngineShared {
    pub enrollment: Arc<EnrollmentStore>,
    pub matcher: EuclideanMatcher,
    pub classifier: InteractionClassifier,
    pub aggregate: Arc<AggregationStore>,
    /// Selectable owner role; changes take effect on the next tick.
    owner: RwLock<Option<String>>,
    pub counters: Counters,
    last_outcome: Mutex<&'static str>,
    /// Optional qualifying-event suppression window. Zero = off, the
    /// default: repeated qualifying ticks each emit a new event.
    cooldown: Duration,
    last_event_at: Mutex<Option<Instant>>,
    in_flight: AtomicBool,
}

impl EngineShared {
    pub fn new(
        enrollment: Arc<EnrollmentStore>,
        matcher: EuclideanMatcher,
        classifier: InteractionClassifier,
        aggregate: Arc<AggregationStore>,
        initial_owner: Option<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            enrollment,
            matcher,
            classifier,
            aggregate,
            owner: RwLock::new(initial_owner),
            counters: Counters::default(),
            last_outcome: Mutex::new("none"),
            cooldown,
            last_event_at: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn owner(&self) -> Option<String> {
        self.owner.read().expect("owner lock poisoned").clone()
    }

    /// Swap the owner role. Takes effect on the next tick.
    pub fn set_owner(&self, owner: Option<String>) {
        *self.owner.write().expect("owner lock poisoned") = owner;
    }

    pub fn last_outcome(&self) -> &'static str {
        *self.last_outcome.lock().expect("outcome lock poisoned")
    }
}

/// Handle to the running sampler task.
pub struct SamplerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop scheduling new ticks. An in-flight detection cycle is allowed
    /// to complete before this resolves.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the periodic sampler.
///
/// Each tick either starts one detection cycle on the blocking pool or,
/// when the previous cycle is still running, skips entirely.
pub fn spawn_sampler(
    shared: Arc<EngineShared>,
    source: Arc<dyn ProbeSource>,
    mirror: Option<Arc<Mutex<Mirror>>>,
    period: Duration,
) -> SamplerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        tracing::info!(period_ms = period.as_millis() as u64, "sampler started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    shared.counters.ticks.fetch_add(1, Ordering::Relaxed);

                    // Non-blocking overlap guard: never two cycles at once.
                    if shared
                        .in_flight
                        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                        .is_err()
                    {
                        shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("previous detection cycle still running; tick skipped");
                        continue;
                    }

                    let shared = Arc::clone(&shared);
                    let source = Arc::clone(&source);
                    let mirror = mirror.clone();
                    in_flight = Some(tokio::task::spawn_blocking(move || {
                        run_cycle(&shared, source.as_ref(), mirror.as_deref());
                        shared.in_flight.store(false, Ordering::Release);
                    }));
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        // Let the in-flight cycle (if any) finish before exiting.
        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
        tracing::info!("sampler stopped");
    });

    SamplerHandle { shutdown_tx, task }
}

/// One detection cycle: sample probes, match each against the gallery,
/// classify the tick, and fold a qualifying event into the aggregate.
///
/// Every failure here is contained within the tick — a source or detector
/// error degrades to an empty sample and the cycle carries on.
fn run_cycle(shared: &EngineShared, source: &dyn ProbeSource, mirror: Option<&Mutex<Mirror>>) {
    let probes = match source.sample() {
        Ok(probes) => probes,
        Err(err) => {
            shared
                .counters
                .detection_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "detection failed; treating tick as empty sample");
            Vec::new()
        }
    };

    let gallery = shared.enrollment.gallery();
    let observations: Vec<Observation> = probes
        .into_iter()
        .map(|probe| Observation {
            result: shared.matcher.match_probe(&probe.embedding, gallery),
            expressions: probe.expressions,
        })
        .collect();

    let owner = shared.owner();
    let outcome = shared.classifier.classify(owner.as_deref(), &observations);
    *shared.last_outcome.lock().expect("outcome lock poisoned") = outcome.label();
    tracing::debug!(
        probes = observations.len(),
        outcome = outcome.label(),
        "tick classified"
    );

    let TickOutcome::Qualifying(event) = outcome else {
        return;
    };

    if shared.cooldown > Duration::ZERO {
        let mut last = shared.last_event_at.lock().expect("cooldown lock poisoned");
        if let Some(at) = *last {
            if at.elapsed() < shared.cooldown {
                shared.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("qualifying tick inside cooldown window; event suppressed");
                return;
            }
        }
        *last = Some(Instant::now());
    }

    match shared.aggregate.apply(&event) {
        Ok(()) => {
            shared.counters.events.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                sender = %event.sender_id,
                receiver = %event.receiver_id,
                weight = event.weight,
                "interaction recorded"
            );
            if let Some(mirror) = mirror {
                let mirror = mirror.lock().expect("mirror lock poisoned");
                if let Err(err) = mirror.record(&event) {
                    tracing::warn!(error = %err, "mirror write failed; in-memory total unaffected");
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_core::source::SampleError;
    use rapport_core::types::{Embedding, Expression, ExpressionScores, Identity, Probe};
    use rapport_core::weight::WeightPolicy;
    use std::sync::atomic::AtomicUsize;

    fn enrollment() -> Arc<EnrollmentStore> {
        let identities = vec![
            Identity {
                id: "owner".into(),
                display_name: "Owner".into(),
                reference_embeddings: vec![Embedding { values: vec![0.0, 0.0] }],
            },
            Identity {
                id: "target".into(),
                display_name: "Target".into(),
                reference_embeddings: vec![Embedding { values: vec![10.0, 10.0] }],
            },
        ];
        Arc::new(EnrollmentStore::from_identities(identities).unwrap())
    }

    fn shared_with(owner: Option<&str>, cooldown: Duration) -> Arc<EngineShared> {
        let enrollment = enrollment();
        let aggregate = Arc::new(AggregationStore::new(
            enrollment.identities().iter().map(|i| i.id.clone()),
        ));
        Arc::new(EngineShared::new(
            enrollment,
            EuclideanMatcher::default(),
            InteractionClassifier::new("target", WeightPolicy::default()),
            aggregate,
            owner.map(String::from),
            cooldown,
        ))
    }

    fn happy_probe(values: Vec<f32>) -> Probe {
        let mut expressions = ExpressionScores::default();
        expressions.scores.insert(Expression::Happy, 0.9);
        Probe {
            embedding: Embedding { values },
            expressions,
        }
    }

    /// Returns both probes (owner + happy target), tracking concurrency.
    struct SlowSource {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        samples: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                samples: AtomicUsize::new(0),
            }
        }
    }

    impl ProbeSource for SlowSource {
        fn sample(&self) -> Result<Vec<Probe>, SampleError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.samples.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                happy_probe(vec![0.1, 0.0]),
                happy_probe(vec![10.0, 10.1]),
            ])
        }
    }

    struct FailingSource;

    impl ProbeSource for FailingSource {
        fn sample(&self) -> Result<Vec<Probe>, SampleError> {
            Err(SampleError("camera unplugged".into()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slow_cycles_never_overlap() {
        let shared = shared_with(Some("owner"), Duration::ZERO);
        let source = Arc::new(SlowSource::new(Duration::from_millis(80)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            Arc::clone(&source) as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.shutdown().await;

        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert!(shared.counters.skipped.load(Ordering::Relaxed) > 0);
        // Cycle duration bounds the number of started cycles.
        assert!(source.samples.load(Ordering::SeqCst) <= 300 / 80 + 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_stops_scheduling() {
        let shared = shared_with(Some("owner"), Duration::ZERO);
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            Arc::clone(&source) as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        let after = source.samples.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.samples.load(Ordering::SeqCst), after);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_qualifying_ticks_accumulate() {
        let shared = shared_with(Some("owner"), Duration::ZERO);
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let events = shared.counters.events.load(Ordering::Relaxed);
        assert!(events > 1, "expected repeated qualifying ticks, got {events}");
        let snapshot = shared.aggregate.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].sender_id, "target");
        assert_eq!(snapshot[0].receiver_id, "owner");
        // Happy target → every event carries the high weight.
        assert_eq!(snapshot[0].cumulative_weight, u64::from(events) * 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detection_failure_degrades_to_empty_sample() {
        let shared = shared_with(Some("owner"), Duration::ZERO);
        let handle = spawn_sampler(
            Arc::clone(&shared),
            Arc::new(FailingSource) as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        assert!(shared.counters.detection_failures.load(Ordering::Relaxed) > 0);
        assert_eq!(shared.counters.events.load(Ordering::Relaxed), 0);
        assert_eq!(shared.last_outcome(), "nobody");
        assert!(shared.aggregate.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_owner_means_inactive() {
        let shared = shared_with(None, Duration::ZERO);
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        assert_eq!(shared.counters.events.load(Ordering::Relaxed), 0);
        assert_eq!(shared.last_outcome(), "inactive");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_owner_change_applies_on_next_tick() {
        let shared = shared_with(None, Duration::ZERO);
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(shared.counters.events.load(Ordering::Relaxed), 0);

        shared.set_owner(Some("owner".into()));
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;

        assert!(shared.counters.events.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cooldown_suppresses_repeat_events() {
        let shared = shared_with(Some("owner"), Duration::from_secs(60));
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(shared.counters.events.load(Ordering::Relaxed), 1);
        assert!(shared.counters.suppressed.load(Ordering::Relaxed) > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cooldown_expiry_permits_next_event() {
        // Window much shorter than the run: at least one further event
        // must land after the first window elapses.
        let shared = shared_with(Some("owner"), Duration::from_millis(60));
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            None,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.shutdown().await;

        let events = shared.counters.events.load(Ordering::Relaxed);
        assert!(events >= 2, "expected an event after the window, got {events}");
        // Still rate-limited: far fewer events than qualifying ticks.
        assert!(shared.counters.suppressed.load(Ordering::Relaxed) > 0);
        assert!(events <= 250 / 60 + 2, "cooldown not limiting events: {events}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_reach_the_mirror() {
        let shared = shared_with(Some("owner"), Duration::ZERO);
        let mirror = Arc::new(Mutex::new(Mirror::open_in_memory().unwrap()));
        let source = Arc::new(SlowSource::new(Duration::from_millis(1)));
        let handle = spawn_sampler(
            Arc::clone(&shared),
            source as Arc<dyn ProbeSource>,
            Some(Arc::clone(&mirror)),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        let edges = mirror.lock().unwrap().load_edges().unwrap();
        let snapshot = shared.aggregate.snapshot();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].cumulative_weight, snapshot[0].cumulative_weight);
    }
}
