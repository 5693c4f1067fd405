//! Operator control surface and the placement loop.
//!
//! A [`GhostBot`] owns all reconciliation state. The loop runs on one worker
//! thread at a time; control calls from the operator only touch state under
//! a short-lived lock and never wait on the network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ghostbot_contracts::color::ColorId;
use ghostbot_contracts::config::{
    DEFAULT_ENERGY_RESERVE, DEFAULT_TILES_PER_REQUEST, DEFAULT_TILE_SIZE,
};
use ghostbot_contracts::events::{payload, EventPayload, EventWriter};
use ghostbot_contracts::grid::PixelSample;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::api::{Collaborators, ImageSource, Session};
use crate::canvas::{fetch_target_delta, CanvasState};
use crate::error::{EngineError, EngineResult};
use crate::placement::{submit_batch, SubmitOutcome};
use crate::reconcile::{order_by_rarity, outstanding, pacing_delay, take_batch};
use crate::target::{build_target, FilterPolicy, TargetPixelSet};

const LOOP_THREAD_NAME: &str = "ghostbot-loop";
const PREVIEW_SYNC_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub tile_size: i64,
    pub tiles_per_request: usize,
    pub energy_reserve: u32,
    /// Floor for the inter-batch wait so an empty budget never spins.
    pub min_idle_wait: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            tiles_per_request: DEFAULT_TILES_PER_REQUEST,
            energy_reserve: DEFAULT_ENERGY_RESERVE,
            min_idle_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    Completed,
    Cancelled,
    AuthLost,
    NetworkError,
    ImageNotLoaded,
}

impl LoopExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::AuthLost => "auth_lost",
            Self::NetworkError => "network_error",
            Self::ImageNotLoaded => "image_not_loaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    ImageNotLoaded(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub iterations: u64,
    pub batches_submitted: u64,
    pub pixels_submitted: u64,
    pub last_outstanding: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub state: BotState,
    pub image: Option<String>,
    pub target_pixels: usize,
    pub cached_pixels: usize,
    pub cursor: i64,
    pub generation: u64,
    pub policy: FilterPolicy,
    pub ignored: Vec<ColorId>,
    pub session_active: bool,
    pub last_exit: Option<LoopExit>,
    pub stats: LoopStats,
}

struct BotInner {
    image: Option<Arc<dyn ImageSource>>,
    policy: FilterPolicy,
    ignored: HashSet<ColorId>,
    target: Option<Arc<TargetPixelSet>>,
    canvas: CanvasState,
    session: Session,
    last_exit: Option<LoopExit>,
    stats: LoopStats,
}

struct Shared {
    collaborators: Collaborators,
    settings: EngineSettings,
    events: EventWriter,
    inner: Mutex<BotInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BotInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn emit(&self, event_type: &str, fields: EventPayload) {
        if let Err(err) = self.events.emit(event_type, fields) {
            warn!("event log write failed ({event_type}): {err}");
        }
    }
}

struct LoopWorker {
    stop: Arc<AtomicBool>,
    wake: mpsc::Sender<()>,
    handle: thread::JoinHandle<LoopExit>,
}

pub struct GhostBot {
    shared: Arc<Shared>,
    worker: Option<LoopWorker>,
}

impl GhostBot {
    pub fn new(
        collaborators: Collaborators,
        settings: EngineSettings,
        session: Session,
        events: EventWriter,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                collaborators,
                settings,
                events,
                inner: Mutex::new(BotInner {
                    image: None,
                    policy: FilterPolicy::default(),
                    ignored: HashSet::new(),
                    target: None,
                    canvas: CanvasState::default(),
                    session,
                    last_exit: None,
                    stats: LoopStats::default(),
                }),
            }),
            worker: None,
        }
    }

    /// Takes effect on the next reload.
    pub fn set_image_source(&self, source: Arc<dyn ImageSource>) {
        info!("ghost image set to {}", source.describe());
        self.shared.lock().image = Some(source);
    }

    /// Takes effect on the next reload.
    pub fn configure(&self, policy: FilterPolicy) {
        self.shared.lock().policy = policy;
        info!(
            transparent = policy.include_transparent,
            free_colors = policy.include_free_colors,
            "filters updated"
        );
        self.shared.emit(
            "filters_updated",
            payload(json!({
                "include_transparent": policy.include_transparent,
                "include_free_colors": policy.include_free_colors,
            })),
        );
    }

    /// Replaces the ignored set; an empty list clears it. Takes effect on the
    /// next reload.
    pub fn ignore_colors(&self, ids: impl IntoIterator<Item = ColorId>) {
        let ignored: HashSet<ColorId> = ids.into_iter().collect();
        let mut listed: Vec<ColorId> = ignored.iter().copied().collect();
        listed.sort_unstable();
        self.shared.lock().ignored = ignored;
        info!(ignored = ?listed, "ignored colors updated");
        self.shared
            .emit("ignored_colors_updated", payload(json!({ "ignored": listed })));
    }

    /// Rebuilds the target from the image source and forgets everything known
    /// about the canvas. Returns whether a target could be built.
    pub fn reload(&self) -> bool {
        match rebuild_target(&self.shared) {
            Ok(pixels) => {
                info!("ghost image reloaded: {pixels} target pixels");
                true
            }
            Err(err) => {
                warn!("reload failed: {err}");
                false
            }
        }
    }

    pub fn start(&mut self) -> StartOutcome {
        self.cleanup_finished_worker();
        if self.worker_alive() {
            info!("ghost bot already running");
            return StartOutcome::AlreadyRunning;
        }

        let has_target = self.shared.lock().target.is_some();
        if !has_target {
            match rebuild_target(&self.shared) {
                Ok(_) => {}
                Err(EngineError::ImageNotLoaded(reason)) => {
                    warn!("ghost image not loaded: {reason}");
                    return StartOutcome::ImageNotLoaded(reason);
                }
                Err(err) => {
                    error!("ghost bot could not start: {err}");
                    return StartOutcome::Failed(err.to_string());
                }
            }
        }

        let target_pixels = {
            let mut inner = self.shared.lock();
            inner.stats = LoopStats::default();
            inner.last_exit = None;
            inner.target.as_ref().map(|target| target.len()).unwrap_or(0)
        };

        info!("ghost bot started with {target_pixels} target pixels");
        self.shared
            .emit("bot_started", payload(json!({ "target_pixels": target_pixels })));

        let (wake, wake_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);
        let handle = match thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || run_loop(&shared, &stop_flag, &wake_rx))
        {
            Ok(handle) => handle,
            Err(err) => {
                error!("loop thread spawn failed: {err}");
                return StartOutcome::Failed(format!("loop thread spawn failed: {err}"));
            }
        };
        self.worker = Some(LoopWorker { stop, wake, handle });
        StartOutcome::Started
    }

    /// Requests cancellation and interrupts any pending wait. Does not block;
    /// use [`GhostBot::wait`] to join the loop.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.as_ref() {
            worker.stop.store(true, Ordering::SeqCst);
            let _ = worker.wake.send(());
            info!("ghost bot stop requested");
        }
    }

    /// Blocks until the running loop exits.
    pub fn wait(&mut self) -> Option<LoopExit> {
        let worker = self.worker.take()?;
        match worker.handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("placement loop panicked");
                None
            }
        }
    }

    pub fn state(&self) -> BotState {
        if self.worker_alive() {
            BotState::Running
        } else {
            BotState::Idle
        }
    }

    pub fn status(&self) -> BotStatus {
        let state = self.state();
        let inner = self.shared.lock();
        let mut ignored: Vec<ColorId> = inner.ignored.iter().copied().collect();
        ignored.sort_unstable();
        BotStatus {
            state,
            image: inner.image.as_ref().map(|source| source.describe()),
            target_pixels: inner.target.as_ref().map(|target| target.len()).unwrap_or(0),
            cached_pixels: inner.canvas.cache().len(),
            cursor: inner.canvas.cursor(),
            generation: inner.canvas.generation(),
            policy: inner.policy,
            ignored,
            session_active: inner.session.is_active(),
            last_exit: inner.last_exit,
            stats: inner.stats,
        }
    }

    /// Syncs and returns the outstanding pixels in placement order, without
    /// placing anything. A sync overtaken by a reload is repeated once, then
    /// reported as [`EngineError::SyncSuperseded`].
    pub fn preview(&self) -> EngineResult<Vec<PixelSample>> {
        if self.shared.lock().target.is_none() {
            rebuild_target(&self.shared)?;
        }
        for _ in 0..PREVIEW_SYNC_ATTEMPTS {
            if let SyncResult::Outstanding(mut pixels) = sync_and_diff(&self.shared)? {
                order_by_rarity(&mut pixels);
                return Ok(pixels);
            }
            debug!("preview sync raced a reload; syncing again");
        }
        Err(EngineError::SyncSuperseded {
            attempts: PREVIEW_SYNC_ATTEMPTS,
        })
    }

    fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.handle.is_finished())
            .unwrap_or(false)
    }

    fn cleanup_finished_worker(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .map(|worker| worker.handle.is_finished())
            .unwrap_or(false);
        if finished {
            let _ = self.wait();
        }
    }
}

impl Drop for GhostBot {
    fn drop(&mut self) {
        self.stop();
        let _ = self.wait();
    }
}

fn rebuild_target(shared: &Shared) -> EngineResult<usize> {
    let (source, policy, ignored) = {
        let inner = shared.lock();
        (inner.image.clone(), inner.policy, inner.ignored.clone())
    };
    let built = source
        .ok_or_else(|| EngineError::ImageNotLoaded("no ghost image configured".to_string()))
        .and_then(|source| {
            let image = source.load()?;
            let allowed = shared.collaborators.palette.allowed_colors()?;
            Ok(build_target(&image, &allowed, policy, &ignored))
        });

    let mut inner = shared.lock();
    inner.canvas.reset();
    match built {
        Ok(target) => {
            let pixels = target.len();
            let generation = inner.canvas.generation();
            inner.target = Some(Arc::new(target));
            drop(inner);
            shared.emit(
                "bot_reloaded",
                payload(json!({ "target_pixels": pixels, "generation": generation })),
            );
            Ok(pixels)
        }
        Err(err) => {
            inner.target = None;
            Err(err)
        }
    }
}

enum SyncResult {
    Outstanding(Vec<PixelSample>),
    /// A reload started a new generation while the fetch was in flight.
    Stale,
}

fn sync_and_diff(shared: &Shared) -> EngineResult<SyncResult> {
    let (target, generation, cursor) = {
        let inner = shared.lock();
        let Some(target) = inner.target.clone() else {
            return Err(EngineError::ImageNotLoaded("target not built".to_string()));
        };
        (target, inner.canvas.generation(), inner.canvas.cursor())
    };
    let delta = fetch_target_delta(
        shared.collaborators.tiles.as_ref(),
        target.pixels(),
        shared.settings.tile_size,
        shared.settings.tiles_per_request,
        cursor,
    )?;

    let mut inner = shared.lock();
    if inner.canvas.generation() != generation {
        debug!(generation, "discarding sync from before reload");
        return Ok(SyncResult::Stale);
    }
    let report = inner.canvas.apply(delta);
    let diff = outstanding(target.pixels(), inner.canvas.cache());
    drop(inner);

    debug!(
        tiles = report.tiles_requested,
        pixels = report.pixels_written,
        cursor = report.cursor,
        "sync completed"
    );
    if report.tiles_skipped > 0 {
        shared.emit(
            "tile_skipped",
            payload(json!({ "tiles": report.tiles_skipped })),
        );
    }
    shared.emit(
        "sync_completed",
        payload(json!({
            "tiles_requested": report.tiles_requested,
            "tiles_applied": report.tiles_applied,
            "pixels_written": report.pixels_written,
            "cursor": report.cursor,
            "outstanding": diff.len(),
        })),
    );
    Ok(SyncResult::Outstanding(diff))
}

fn run_loop(shared: &Shared, stop: &AtomicBool, wake: &mpsc::Receiver<()>) -> LoopExit {
    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break LoopExit::Cancelled;
        }
        match run_iteration(shared) {
            Ok(Step::Exit(exit)) => break exit,
            Ok(Step::Wait(delay)) => {
                debug!(delay_s = delay.as_secs_f64(), "waiting for energy");
                match wake.recv_timeout(delay) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break LoopExit::Cancelled,
                }
            }
            Ok(Step::Again) => {}
            Err(EngineError::ImageNotLoaded(reason)) => {
                warn!("ghost image not loaded: {reason}");
                break LoopExit::ImageNotLoaded;
            }
            Err(EngineError::AuthExpired) => {
                warn!("session rejected by the server => stopping the bot");
                shared.lock().session.token.clear();
                break LoopExit::AuthLost;
            }
            Err(err) => {
                error!("placement loop halted: {err}");
                break LoopExit::NetworkError;
            }
        }
    };

    let stats = {
        let mut inner = shared.lock();
        inner.last_exit = Some(exit);
        inner.stats
    };
    info!(reason = exit.as_str(), "placement loop finished");
    shared.emit(
        "bot_stopped",
        payload(json!({
            "reason": exit.as_str(),
            "iterations": stats.iterations,
            "batches_submitted": stats.batches_submitted,
            "pixels_submitted": stats.pixels_submitted,
        })),
    );
    exit
}

enum Step {
    Exit(LoopExit),
    Wait(Duration),
    Again,
}

fn run_iteration(shared: &Shared) -> EngineResult<Step> {
    shared.lock().stats.iterations += 1;

    let mut pixels = match sync_and_diff(shared)? {
        SyncResult::Outstanding(pixels) => pixels,
        SyncResult::Stale => return Ok(Step::Again),
    };
    shared.lock().stats.last_outstanding = pixels.len() as u64;
    if pixels.is_empty() {
        info!("all target pixels placed");
        return Ok(Step::Exit(LoopExit::Completed));
    }
    order_by_rarity(&mut pixels);

    let collaborators = &shared.collaborators;
    let budget = collaborators.energy.budget();
    let batch = take_batch(&pixels, &budget);
    if batch.is_empty() {
        info!(outstanding = pixels.len(), "no energy left");
    } else {
        info!(outstanding = pixels.len(), "placing {} pixels", batch.len());
        let mut session = shared.lock().session.clone();
        let submitted = submit_batch(
            collaborators.placement.as_ref(),
            collaborators.relogin.as_ref(),
            &mut session,
            &batch,
        );
        shared.lock().session = session;

        match submitted? {
            SubmitOutcome::Placed { retried } => {
                collaborators.energy.spend(batch.len() as u32);
                {
                    let mut inner = shared.lock();
                    inner.stats.batches_submitted += 1;
                    inner.stats.pixels_submitted += batch.len() as u64;
                }
                if retried {
                    shared.emit("relogin_attempted", payload(json!({ "recovered": true })));
                }
                shared.emit(
                    "batch_submitted",
                    payload(json!({
                        "pixels": batch.len(),
                        "outstanding": pixels.len(),
                        "retried": retried,
                    })),
                );
            }
            SubmitOutcome::Rejected { status, body } => {
                shared.emit(
                    "placement_failed",
                    payload(json!({ "status": status, "body": body, "pixels": batch.len() })),
                );
            }
            SubmitOutcome::AuthLost { status, body } => {
                shared.emit("relogin_attempted", payload(json!({ "recovered": false })));
                shared.emit(
                    "placement_failed",
                    payload(json!({ "status": status, "body": body, "pixels": batch.len() })),
                );
                warn!("logged out => stopping the bot");
                return Ok(Step::Exit(LoopExit::AuthLost));
            }
        }

        if batch.len() == pixels.len() {
            info!("all target pixels placed");
            return Ok(Step::Exit(LoopExit::Completed));
        }
    }

    let delay = pacing_delay(pixels.len(), &budget, shared.settings.energy_reserve);
    Ok(Step::Wait(delay.max(shared.settings.min_idle_wait)))
}
