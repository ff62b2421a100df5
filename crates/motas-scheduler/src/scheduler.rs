//! The orchestration loop and its public handle.
//!
//! `Scheduler::start` spawns the single scheduling task that owns the
//! cluster and the registered applications. External callers interact
//! through the handle: `add_task` enqueues, `kill` requests a cooperative
//! stop, `observe` copies the committed placement snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use motas_placement::{Cluster, Service};

use crate::app_queue::AppQueue;
use crate::config::SchedulerConfig;
use crate::engine::{PlacementEngine, PlacementMapping};

/// Future returned by an apply callback.
pub type ApplyFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Cluster-manager integration hook.
///
/// Invoked with the mapping after a successful placement attempt and
/// before anything is committed. An `Err` means the mapping could not be
/// realized on the fleet: the attempt is rolled back and the application
/// requeued as if placement had failed.
pub type ApplyCallback = Arc<dyn Fn(PlacementMapping) -> ApplyFuture + Send + Sync>;

/// State shared between the handle and the scheduling task.
struct Shared {
    queue: AppQueue,
    death: AtomicBool,
    placements: RwLock<PlacementMapping>,
}

impl Shared {
    fn killed(&self) -> bool {
        self.death.load(Ordering::Acquire)
    }

    fn publish(&self, placements: PlacementMapping) {
        *self
            .placements
            .write()
            .unwrap_or_else(PoisonError::into_inner) = placements;
    }
}

/// Handle to a running scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduling task bound to `cluster`. Must be called from
    /// within a tokio runtime.
    pub fn start(cluster: Cluster, config: SchedulerConfig) -> Self {
        Self::spawn(cluster, config, None)
    }

    /// Like [`Scheduler::start`], with a cluster-manager apply hook that
    /// gates every commit.
    pub fn start_with_apply(
        cluster: Cluster,
        config: SchedulerConfig,
        apply: ApplyCallback,
    ) -> Self {
        Self::spawn(cluster, config, Some(apply))
    }

    fn spawn(cluster: Cluster, config: SchedulerConfig, apply: Option<ApplyCallback>) -> Self {
        let shared = Arc::new(Shared {
            queue: AppQueue::with_capacity(config.queue_capacity),
            death: AtomicBool::new(false),
            placements: RwLock::new(PlacementMapping::new()),
        });
        let engine = PlacementEngine::new(cluster, config.weights());
        let task_shared = shared.clone();
        let poll = config.poll_interval();
        let handle = tokio::spawn(async move {
            run(engine, task_shared, poll, apply).await;
        });
        Self { shared, handle }
    }

    /// Enqueue an application for placement. Non-blocking; safe from any
    /// thread.
    pub fn add_task(&self, app: Service) {
        debug!(app = %app.id(), priority = app.priority(), "application enqueued");
        self.shared.queue.push(app);
    }

    /// Request a graceful stop. Idempotent; the loop exits at the next
    /// iteration boundary and an in-flight placement finishes first.
    pub fn kill(&self) {
        self.shared.death.store(true, Ordering::Release);
    }

    /// Snapshot of the committed placements (microservice id → node id).
    pub fn observe(&self) -> PlacementMapping {
        self.shared
            .placements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the scheduling task to finish after a `kill`.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

/// The scheduling loop: drain the queue in priority order, commit
/// successful attempts, demote and requeue failed ones, sleep when idle.
async fn run(
    mut engine: PlacementEngine,
    shared: Arc<Shared>,
    poll: std::time::Duration,
    apply: Option<ApplyCallback>,
) {
    info!("scheduler started");
    'outer: while !shared.killed() {
        while let Some(app) = shared.queue.pop() {
            let aid = app.id().to_string();
            info!(app = %aid, priority = app.priority(), "scheduling application");
            engine.register_app(app);

            match engine.place_app(&aid) {
                Ok(mapping) if !mapping.is_empty() => {
                    let accepted = match &apply {
                        Some(hook) => match hook(mapping.clone()).await {
                            Ok(()) => true,
                            Err(error) => {
                                warn!(app = %aid, %error, "apply hook rejected mapping");
                                false
                            }
                        },
                        None => true,
                    };
                    if accepted {
                        engine.commit_app(&aid);
                        shared.publish(engine.placements());
                        info!(app = %aid, microservices = mapping.len(), "application scheduled");
                        for (mid, nid) in &mapping {
                            debug!(ms = %mid, node = %nid, "placement committed");
                        }
                    } else {
                        demote_and_requeue(&mut engine, &shared, &aid);
                    }
                }
                Ok(_) => {
                    debug!(app = %aid, "placement produced no mapping, requeueing");
                    demote_and_requeue(&mut engine, &shared, &aid);
                }
                Err(error) => {
                    info!(app = %aid, %error, "placement failed, requeueing at lower priority");
                    demote_and_requeue(&mut engine, &shared, &aid);
                }
            }

            if shared.killed() {
                break 'outer;
            }
            // Give producers and observers the thread between applications.
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(poll).await;
    }
    info!("scheduler stopped");
}

/// Roll the failed attempt back, drop the application from the engine,
/// and requeue it one priority step lower.
fn demote_and_requeue(engine: &mut PlacementEngine, shared: &Shared, aid: &str) {
    engine.rollback_app(aid);
    if let Some(mut app) = engine.remove_app(aid) {
        app.dec_priority();
        shared.queue.push(app);
    }
}
