//! Observation dispatch worker pool.
//!
//! Each worker owns one bounded crossbeam queue. A sensor is pinned to the
//! queue `serial % workers`, so observations of one sensor reach their sinks
//! in sampling order while different sensors proceed in parallel. A full
//! queue blocks the producer; nothing is dropped while the pool runs.
//!
//! Per observation a worker runs, in order: the world hook, the publish
//! sink (when the sensor has a topic), the log sink (when it has a log
//! path). A failing sink never stops the others; failures are counted in
//! [`DispatchMetrics`] and logged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use fleetsim_common::Observation;
use fleetsim_persist::ObservationLog;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::context::StepClock;
use crate::publish::{PublishedObservation, Publisher};

/// Extension point invoked for every dispatched observation.
///
/// Runs on a dispatch worker, never on the stepping thread. The owning
/// entity is `observation.source` (handle and name); look it up through the
/// world if more is needed, but keep such calls short. A hook that panics is
/// counted and skipped.
pub trait ObservationHook: Send + Sync {
    fn on_observation(&self, observation: &Observation, clock: &StepClock);
}

/// Default hook: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ObservationHook for NoopHook {
    fn on_observation(&self, _observation: &Observation, _clock: &StepClock) {}
}

/// Sink routing of one sensor, shared with the tasks it produces.
#[derive(Debug)]
pub struct SensorRoute {
    serial: u64,
    sensor: String,
    topic: Option<String>,
    log: Option<Mutex<ObservationLog>>,
}

impl SensorRoute {
    pub fn new(serial: u64, sensor: String, topic: Option<String>, log: Option<PathBuf>) -> Self {
        Self {
            serial,
            sensor,
            topic,
            log: log.map(|p| Mutex::new(ObservationLog::new(p))),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn has_log(&self) -> bool {
        self.log.is_some()
    }
}

/// Cumulative dispatch counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchMetrics {
    /// Observations accepted into a worker queue.
    pub enqueued: u64,
    /// Observations fully handled by a worker.
    pub completed: u64,
    /// Hook invocations, including ones that panicked.
    pub hook_calls: u64,
    /// Hook invocations that panicked.
    pub hook_panics: u64,
    /// Successful publish calls.
    pub published: u64,
    /// Failed publish calls (serialization or transport).
    pub publish_failures: u64,
    /// Records appended to log sinks.
    pub logged: u64,
    /// Failed log appends.
    pub log_failures: u64,
    /// Observations refused because the pool was shut down.
    pub dropped: u64,
}

impl DispatchMetrics {
    /// Observations accepted but not yet handled.
    pub fn in_flight(&self) -> u64 {
        self.enqueued.saturating_sub(self.completed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    hook_calls: AtomicU64,
    hook_panics: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    logged: AtomicU64,
    log_failures: AtomicU64,
    dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Outcome of [`ObservationDispatcher::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchShutdownReport {
    pub workers_joined: usize,
    pub metrics: DispatchMetrics,
}

enum Task {
    Observation {
        observation: Arc<Observation>,
        clock: StepClock,
        route: Arc<SensorRoute>,
    },
    Barrier(Sender<()>),
}

struct Shared {
    counters: Counters,
    hook: RwLock<Arc<dyn ObservationHook>>,
    publisher: Arc<dyn Publisher>,
}

pub struct ObservationDispatcher {
    shards: RwLock<Option<Vec<Sender<Task>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl ObservationDispatcher {
    pub fn new(config: &DispatchConfig, publisher: Arc<dyn Publisher>) -> Self {
        let shared = Arc::new(Shared {
            counters: Counters::default(),
            hook: RwLock::new(Arc::new(NoopHook)),
            publisher,
        });
        let count = config.resolved_workers();
        let mut shards = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity.max(1));
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("fleetsim-dispatch-{i}"))
                .spawn(move || worker_loop(rx, shared));
            match spawned {
                Ok(handle) => {
                    shards.push(tx);
                    workers.push(handle);
                }
                Err(e) => tracing::warn!(worker = i, error = %e, "cannot spawn dispatch worker"),
            }
        }
        tracing::debug!(workers = workers.len(), capacity = config.queue_capacity, "dispatch pool started");
        Self {
            shards: RwLock::new((!shards.is_empty()).then_some(shards)),
            workers: Mutex::new(workers),
            shared,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shards.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_running(&self) -> bool {
        self.shards.read().is_some()
    }

    pub fn set_hook(&self, hook: Arc<dyn ObservationHook>) {
        *self.shared.hook.write() = hook;
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        Arc::clone(&self.shared.publisher)
    }

    /// Queue an observation for its sensor's worker.
    ///
    /// Blocks only while that worker's queue is full. After shutdown the
    /// observation is counted as dropped.
    pub fn report(&self, observation: Arc<Observation>, clock: StepClock, route: Arc<SensorRoute>) {
        let shards = self.shards.read();
        let Some(shards) = shards.as_ref() else {
            bump(&self.shared.counters.dropped);
            tracing::warn!(
                sensor = %route.sensor,
                seq = observation.sequence,
                "dispatcher is shut down, observation dropped"
            );
            return;
        };
        let shard = (route.serial % shards.len() as u64) as usize;
        let seq = observation.sequence;
        let sensor = route.sensor.clone();
        match shards[shard].send(Task::Observation {
            observation,
            clock,
            route,
        }) {
            Ok(()) => {
                bump(&self.shared.counters.enqueued);
                tracing::trace!(%sensor, seq, shard, "observation queued");
            }
            Err(_) => {
                bump(&self.shared.counters.dropped);
                tracing::warn!(%sensor, seq, shard, "dispatch worker gone, observation dropped");
            }
        }
    }

    /// Block until everything queued before this call has been handled.
    pub fn flush(&self) {
        let waits: Vec<Receiver<()>> = {
            let shards = self.shards.read();
            let Some(shards) = shards.as_ref() else {
                return;
            };
            shards
                .iter()
                .filter_map(|tx| {
                    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
                    tx.send(Task::Barrier(done_tx)).ok().map(|()| done_rx)
                })
                .collect()
        };
        for rx in waits {
            // Err means the worker exited, which also drained its queue.
            let _ = rx.recv();
        }
    }

    pub fn metrics(&self) -> DispatchMetrics {
        let c = &self.shared.counters;
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        DispatchMetrics {
            enqueued: load(&c.enqueued),
            completed: load(&c.completed),
            hook_calls: load(&c.hook_calls),
            hook_panics: load(&c.hook_panics),
            published: load(&c.published),
            publish_failures: load(&c.publish_failures),
            logged: load(&c.logged),
            log_failures: load(&c.log_failures),
            dropped: load(&c.dropped),
        }
    }

    /// Close the queues, let the workers drain them, and join the workers.
    ///
    /// Idempotent; a second call joins nothing.
    pub fn shutdown(&self) -> DispatchShutdownReport {
        // Dropping the senders ends each worker loop once its queue is empty.
        drop(self.shards.write().take());
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let mut workers_joined = 0;
        for handle in handles {
            match handle.join() {
                Ok(()) => workers_joined += 1,
                Err(_) => tracing::warn!("dispatch worker panicked"),
            }
        }
        let metrics = self.metrics();
        if workers_joined > 0 {
            tracing::info!(
                workers_joined,
                completed = metrics.completed,
                dropped = metrics.dropped,
                "dispatch pool shut down"
            );
        }
        DispatchShutdownReport {
            workers_joined,
            metrics,
        }
    }
}

impl Drop for ObservationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Task>, shared: Arc<Shared>) {
    while let Ok(task) = rx.recv() {
        match task {
            Task::Barrier(done) => {
                let _ = done.send(());
            }
            Task::Observation {
                observation,
                clock,
                route,
            } => {
                handle_observation(&shared, &observation, &clock, &route);
                bump(&shared.counters.completed);
            }
        }
    }
    // Channel closed and drained: worker exits cleanly.
}

fn handle_observation(shared: &Shared, obs: &Observation, clock: &StepClock, route: &SensorRoute) {
    let c = &shared.counters;

    let hook = Arc::clone(&*shared.hook.read());
    bump(&c.hook_calls);
    if catch_unwind(AssertUnwindSafe(|| hook.on_observation(obs, clock))).is_err() {
        bump(&c.hook_panics);
        tracing::warn!(sensor = %route.sensor, seq = obs.sequence, "observation hook panicked");
    }

    if let Some(topic) = route.topic.as_deref() {
        let sent = catch_unwind(AssertUnwindSafe(|| {
            PublishedObservation::new(obs.clone())
                .to_json()
                .and_then(|bytes| shared.publisher.publish(topic, &bytes))
        }));
        match sent {
            Ok(Ok(())) => bump(&c.published),
            Ok(Err(e)) => {
                bump(&c.publish_failures);
                tracing::warn!(sensor = %route.sensor, topic, error = %e, "publish failed");
            }
            Err(_) => {
                bump(&c.publish_failures);
                tracing::warn!(sensor = %route.sensor, topic, "publisher panicked");
            }
        }
    }

    if let Some(log) = &route.log {
        let mut log = log.lock();
        match catch_unwind(AssertUnwindSafe(|| log.append(obs))) {
            Ok(Ok(())) => bump(&c.logged),
            Ok(Err(e)) => {
                bump(&c.log_failures);
                tracing::warn!(sensor = %route.sensor, path = %log.path().display(), error = %e, "log append failed");
            }
            Err(_) => {
                bump(&c.log_failures);
                tracing::warn!(sensor = %route.sensor, path = %log.path().display(), "log append panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{InProcessBus, PublishError};
    use fleetsim_common::{EntityHandle, ObservationPayload, ObservationSource, Pose, Twist};

    fn obs(sensor: &str, seq: u64) -> Arc<Observation> {
        Arc::new(Observation {
            timestamp: seq as f64 * 0.1,
            source: ObservationSource {
                handle: EntityHandle::new(0, 0),
                name: "r1".into(),
            },
            sensor: sensor.into(),
            sequence: seq,
            owner_pose: Pose::default(),
            payload: ObservationPayload::Odometry {
                pose: Pose::default(),
                twist: Twist::default(),
            },
        })
    }

    fn route(serial: u64, topic: Option<&str>, log: Option<PathBuf>) -> Arc<SensorRoute> {
        Arc::new(SensorRoute::new(
            serial,
            format!("s{serial}"),
            topic.map(str::to_string),
            log,
        ))
    }

    fn config(workers: usize) -> DispatchConfig {
        DispatchConfig {
            workers,
            queue_capacity: 4,
        }
    }

    /// Records (sensor, sequence) in arrival order.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, u64)>>);

    impl ObservationHook for Recorder {
        fn on_observation(&self, o: &Observation, _clock: &StepClock) {
            self.0.lock().push((o.sensor.clone(), o.sequence));
        }
    }

    struct Panicker;

    impl ObservationHook for Panicker {
        fn on_observation(&self, _o: &Observation, _clock: &StepClock) {
            panic!("hook failure");
        }
    }

    struct BrokenTransport;

    impl Publisher for BrokenTransport {
        fn advertise(&self, _topic: &str) -> Result<(), PublishError> {
            Ok(())
        }
        fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            Err(PublishError::Transport {
                topic: topic.into(),
                message: "link down".into(),
            })
        }
    }

    struct PanickingPublisher;

    impl Publisher for PanickingPublisher {
        fn advertise(&self, _topic: &str) -> Result<(), PublishError> {
            Ok(())
        }
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            panic!("transport bug");
        }
    }

    #[test]
    fn per_sensor_order_is_preserved() {
        let d = ObservationDispatcher::new(&config(3), Arc::new(InProcessBus::new()));
        let rec = Arc::new(Recorder::default());
        d.set_hook(rec.clone());
        let routes: Vec<_> = (0..4).map(|s| route(s, None, None)).collect();
        for seq in 0..50 {
            for r in &routes {
                d.report(obs(&r.sensor, seq), StepClock::default(), Arc::clone(r));
            }
        }
        d.flush();
        let seen = rec.0.lock().clone();
        assert_eq!(seen.len(), 200);
        for r in &routes {
            let seqs: Vec<u64> = seen
                .iter()
                .filter(|(s, _)| *s == r.sensor)
                .map(|(_, q)| *q)
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
        assert_eq!(d.metrics().completed, 200);
    }

    #[test]
    fn publish_only_route_publishes_once_and_never_logs() {
        let bus = Arc::new(InProcessBus::new());
        bus.advertise("/odom").unwrap();
        let rx = bus.subscribe("/odom");
        let d = ObservationDispatcher::new(&config(1), bus.clone());
        d.report(obs("s0", 0), StepClock::default(), route(0, Some("/odom"), None));
        d.flush();
        let m = d.metrics();
        assert_eq!(m.published, 1);
        assert_eq!(m.logged + m.log_failures, 0);
        let msg = PublishedObservation::from_json(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg.source_object_id, "r1");
    }

    #[test]
    fn sink_failures_are_contained() {
        let tmp = tempfile::tempdir().unwrap();
        let d = ObservationDispatcher::new(&config(1), Arc::new(BrokenTransport));
        let rec = Arc::new(Recorder::default());
        d.set_hook(rec.clone());
        // A directory is not a writable log file.
        let r = route(0, Some("/t"), Some(tmp.path().to_path_buf()));
        d.report(obs("s0", 0), StepClock::default(), Arc::clone(&r));
        d.report(obs("s0", 1), StepClock::default(), r);
        d.flush();
        let m = d.metrics();
        assert_eq!(m.publish_failures, 2);
        assert_eq!(m.log_failures, 2);
        assert_eq!(m.completed, 2);
        // The hook still saw both observations.
        assert_eq!(rec.0.lock().len(), 2);
    }

    #[test]
    fn panicking_hook_does_not_kill_worker() {
        let d = ObservationDispatcher::new(&config(1), Arc::new(InProcessBus::new()));
        d.set_hook(Arc::new(Panicker));
        for seq in 0..3 {
            d.report(obs("s0", seq), StepClock::default(), route(0, None, None));
        }
        d.flush();
        let m = d.metrics();
        assert_eq!(m.hook_panics, 3);
        assert_eq!(m.completed, 3);
        assert_eq!(d.shutdown().workers_joined, 1);
    }

    #[test]
    fn panicking_publisher_does_not_kill_worker() {
        let d = ObservationDispatcher::new(&config(1), Arc::new(PanickingPublisher));
        let rec = Arc::new(Recorder::default());
        d.set_hook(rec.clone());
        let r = route(0, Some("/t"), None);
        for seq in 0..5 {
            d.report(obs("s0", seq), StepClock::default(), Arc::clone(&r));
        }
        d.flush();
        let m = d.metrics();
        assert_eq!(m.enqueued, 5);
        assert_eq!(m.completed, 5);
        assert_eq!(m.publish_failures, 5);
        assert_eq!(m.dropped, 0);
        assert_eq!(rec.0.lock().len(), 5);
        assert_eq!(d.shutdown().workers_joined, 1);
    }

    #[test]
    fn log_sink_appends_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s0.obs");
        let d = ObservationDispatcher::new(&config(2), Arc::new(InProcessBus::new()));
        let r = route(0, None, Some(path.clone()));
        for seq in 0..5 {
            d.report(obs("s0", seq), StepClock::default(), Arc::clone(&r));
        }
        d.flush();
        assert_eq!(d.metrics().logged, 5);
        let back = fleetsim_persist::read_log(&path).unwrap();
        assert_eq!(back.iter().map(|o| o.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shutdown_drains_queue_then_drops_new_reports() {
        let d = ObservationDispatcher::new(&config(2), Arc::new(InProcessBus::new()));
        for seq in 0..20 {
            d.report(obs("s0", seq), StepClock::default(), route(seq % 2, None, None));
        }
        let report = d.shutdown();
        assert_eq!(report.workers_joined, 2);
        assert_eq!(report.metrics.completed, 20);
        assert!(!d.is_running());

        d.report(obs("s0", 99), StepClock::default(), route(0, None, None));
        assert_eq!(d.metrics().dropped, 1);
        assert_eq!(d.shutdown().workers_joined, 0);
        // Flushing a stopped pool returns immediately.
        d.flush();
    }
}
