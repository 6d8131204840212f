use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use serde::Serialize;
use tokio::select;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::events::PreloadEvent;
use crate::media::{MediaId, MediaItem};
use crate::tasks::fetch::{FetchedImage, Fetcher};
use crate::tasks::memory::MemorySample;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct PreloadOptions {
    pub max_concurrent: usize,
    pub horizon: usize,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub max_cache_bytes: usize,
    pub high_water: f32,
    pub low_water: f32,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            horizon: 3,
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(8),
            max_cache_bytes: 256 * 1024 * 1024,
            high_water: 0.85,
            low_water: 0.75,
        }
    }
}

impl PreloadOptions {
    /// Delay before retry number `attempts` (1-based), doubling from the base up to the cap.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(1u32 << exponent)
            .min(self.retry_cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PreloadTask {
    pub media: MediaItem,
    pub state: TaskState,
    pub attempts: u32,
    pub priority: u32,
    seq: u64,
    not_before: Option<Instant>,
    discard: bool,
}

#[derive(Debug, Clone)]
pub struct PreloadCacheEntry {
    pub url: String,
    pub loaded_at: SystemTime,
    pub size_estimate: usize,
    pub width: u32,
    pub height: u32,
    pub palette: Vec<[u8; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PreloadStats {
    pub queue_size: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub retries: u64,
    pub memory_pressure_events: u64,
    pub resident_bytes: usize,
    pub horizon: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Queued,
    AlreadyLoaded,
    AlreadyPending,
    /// Gave up on this item earlier; it stays failed until it leaves the window.
    Failed,
    /// Refused under memory pressure or after shutdown.
    Rejected,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cache_hits: u64,
    cache_misses: u64,
    retries: u64,
    memory_pressure_events: u64,
}

#[derive(Debug)]
struct CacheState {
    options: PreloadOptions,
    tasks: HashMap<MediaId, PreloadTask>,
    queue: BTreeSet<(u32, u64, MediaId)>,
    loaded: HashMap<MediaId, PreloadCacheEntry>,
    failed: HashSet<MediaId>,
    counters: Counters,
    active: usize,
    resident_bytes: usize,
    next_seq: u64,
    under_pressure: bool,
    horizon: usize,
    shut_down: bool,
}

enum Dispatch {
    Start(MediaItem),
    WaitUntil(Instant),
    Idle,
}

struct Shared {
    state: Mutex<CacheState>,
    wake: Notify,
    events: broadcast::Sender<PreloadEvent>,
    cancel: CancellationToken,
}

/// Bounded, priority-ordered image preloader.
///
/// Cheap to clone; all clones share one loaded set. Only the dispatcher
/// started by [`run`] adds entries; callers schedule, cancel, query, and evict.
#[derive(Clone)]
pub struct PreloadCache {
    shared: Arc<Shared>,
}

impl PreloadCache {
    pub fn new(options: PreloadOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let horizon = options.horizon.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    options,
                    tasks: HashMap::new(),
                    queue: BTreeSet::new(),
                    loaded: HashMap::new(),
                    failed: HashSet::new(),
                    counters: Counters::default(),
                    active: 0,
                    resident_bytes: 0,
                    next_seq: 0,
                    under_pressure: false,
                    horizon,
                    shut_down: false,
                }),
                wake: Notify::new(),
                events,
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.shared.state.lock().expect("preload state poisoned")
    }

    /// Request `item` with `priority` = distance from the playhead (0 = on screen next).
    pub fn schedule(&self, item: &MediaItem, priority: u32) -> ScheduleOutcome {
        let outcome = {
            let mut st = self.state();
            st.schedule(item, priority)
        };
        if outcome == ScheduleOutcome::Queued {
            debug!(media = %item.id, priority, "preload queued");
            self.shared.wake.notify_one();
        }
        outcome
    }

    /// Drop a queued request, or mark an in-flight one to be discarded when it lands.
    pub fn cancel(&self, id: &MediaId) {
        let mut st = self.state();
        st.cancel(id);
    }

    pub fn is_ready(&self, id: &MediaId) -> bool {
        self.state().loaded.contains_key(id)
    }

    pub fn is_failed(&self, id: &MediaId) -> bool {
        self.state().failed.contains(id)
    }

    pub fn task_state(&self, id: &MediaId) -> Option<TaskState> {
        let st = self.state();
        if st.loaded.contains_key(id) {
            Some(TaskState::Loaded)
        } else if st.failed.contains(id) {
            Some(TaskState::Failed)
        } else {
            st.tasks.get(id).map(|t| t.state)
        }
    }

    pub fn entry(&self, id: &MediaId) -> Option<PreloadCacheEntry> {
        self.state().loaded.get(id).cloned()
    }

    pub fn palette(&self, id: &MediaId) -> Option<Vec<[u8; 3]>> {
        self.state()
            .loaded
            .get(id)
            .map(|entry| entry.palette.clone())
            .filter(|colors| !colors.is_empty())
    }

    /// Effective horizon; shrinks while memory is under pressure.
    pub fn horizon(&self) -> usize {
        self.state().horizon
    }

    pub fn is_under_pressure(&self) -> bool {
        self.state().under_pressure
    }

    /// Evict loaded entries and cancel requests for anything outside `window`.
    pub fn retain_window<'a, I>(&self, window: I)
    where
        I: IntoIterator<Item = &'a MediaId>,
    {
        let keep: HashSet<&MediaId> = window.into_iter().collect();
        let mut st = self.state();
        let evict: Vec<MediaId> = st
            .loaded
            .keys()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        for id in evict {
            if let Some(entry) = st.loaded.remove(&id) {
                st.resident_bytes = st.resident_bytes.saturating_sub(entry.size_estimate);
                debug!(media = %id, bytes = entry.size_estimate, "evicted from preload cache");
            }
        }
        let stale: Vec<MediaId> = st
            .tasks
            .keys()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        for id in stale {
            st.cancel(&id);
        }
        st.failed.retain(|id| keep.contains(id));
    }

    pub fn stats(&self) -> PreloadStats {
        let st = self.state();
        PreloadStats {
            queue_size: st.queue.len(),
            active: st.active,
            completed: st.counters.completed,
            failed: st.counters.failed,
            cache_hits: st.counters.cache_hits,
            cache_misses: st.counters.cache_misses,
            retries: st.counters.retries,
            memory_pressure_events: st.counters.memory_pressure_events,
            resident_bytes: st.resident_bytes,
            horizon: st.horizon,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreloadEvent> {
        self.shared.events.subscribe()
    }

    /// Stop dispatching. In-flight fetches finish and their results are dropped.
    pub fn shutdown(&self) {
        {
            let mut st = self.state();
            st.shut_down = true;
            st.queue.clear();
            st.tasks.retain(|_, task| task.state == TaskState::Loading);
        }
        self.shared.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Feed one memory reading into the pressure gauge.
    pub fn apply_memory_sample(&self, sample: MemorySample) {
        let mut st = self.state();
        st.apply_memory_sample(sample);
    }

    fn next_dispatch(&self, now: Instant) -> Dispatch {
        self.state().next_dispatch(now)
    }

    #[cfg(test)]
    pub(crate) fn insert_loaded(&self, item: &MediaItem) {
        let mut st = self.state();
        if let Some(task) = st.tasks.remove(&item.id) {
            st.queue.remove(&(task.priority, task.seq, item.id.clone()));
        }
        st.loaded.insert(
            item.id.clone(),
            PreloadCacheEntry {
                url: item.url.clone(),
                loaded_at: SystemTime::now(),
                size_estimate: 16,
                width: item.width,
                height: item.height,
                palette: vec![[90, 120, 160]],
            },
        );
        st.resident_bytes += 16;
    }

    fn complete(&self, id: MediaId, result: crate::error::Result<FetchedImage>, now: Instant) {
        let event = {
            let mut st = self.state();
            st.complete(id, result, now)
        };
        if let Some(event) = event {
            // no subscribers is fine
            let _ = self.shared.events.send(event);
        }
        self.shared.wake.notify_one();
    }
}

impl CacheState {
    fn schedule(&mut self, item: &MediaItem, priority: u32) -> ScheduleOutcome {
        if self.shut_down {
            return ScheduleOutcome::Rejected;
        }
        if self.loaded.contains_key(&item.id) {
            self.counters.cache_hits += 1;
            return ScheduleOutcome::AlreadyLoaded;
        }
        if let Some(task) = self.tasks.get_mut(&item.id) {
            match task.state {
                TaskState::Queued if priority < task.priority => {
                    self.queue.remove(&(task.priority, task.seq, item.id.clone()));
                    task.priority = priority;
                    self.queue.insert((priority, task.seq, item.id.clone()));
                }
                TaskState::Loading => task.discard = false,
                _ => {}
            }
            return ScheduleOutcome::AlreadyPending;
        }
        if self.failed.contains(&item.id) {
            return ScheduleOutcome::Failed;
        }
        if self.under_pressure && priority > 0 {
            self.counters.memory_pressure_events += 1;
            debug!(media = %item.id, priority, "preload rejected under memory pressure");
            return ScheduleOutcome::Rejected;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            item.id.clone(),
            PreloadTask {
                media: item.clone(),
                state: TaskState::Queued,
                attempts: 0,
                priority,
                seq,
                not_before: None,
                discard: false,
            },
        );
        self.queue.insert((priority, seq, item.id.clone()));
        self.counters.cache_misses += 1;
        ScheduleOutcome::Queued
    }

    fn cancel(&mut self, id: &MediaId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        match task.state {
            TaskState::Queued => {
                self.queue.remove(&(task.priority, task.seq, id.clone()));
                self.tasks.remove(id);
                debug!(media = %id, "queued preload cancelled");
            }
            TaskState::Loading => {
                task.discard = true;
                debug!(media = %id, "in-flight preload marked for discard");
            }
            TaskState::Loaded | TaskState::Failed => {
                self.tasks.remove(id);
            }
        }
    }

    fn next_dispatch(&mut self, now: Instant) -> Dispatch {
        if self.shut_down || self.active >= self.options.max_concurrent {
            return Dispatch::Idle;
        }
        let mut earliest: Option<Instant> = None;
        let mut chosen: Option<(u32, u64, MediaId)> = None;
        for key in &self.queue {
            let not_before = self.tasks.get(&key.2).and_then(|t| t.not_before);
            match not_before {
                Some(at) if at > now => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                _ => {
                    chosen = Some(key.clone());
                    break;
                }
            }
        }
        if let Some(key) = chosen {
            self.queue.remove(&key);
            if let Some(task) = self.tasks.get_mut(&key.2) {
                task.state = TaskState::Loading;
                task.not_before = None;
                self.active += 1;
                return Dispatch::Start(task.media.clone());
            }
        }
        match earliest {
            Some(at) => Dispatch::WaitUntil(at),
            None => Dispatch::Idle,
        }
    }

    fn complete(
        &mut self,
        id: MediaId,
        result: crate::error::Result<FetchedImage>,
        now: Instant,
    ) -> Option<PreloadEvent> {
        self.active = self.active.saturating_sub(1);
        let Some(task) = self.tasks.get_mut(&id) else {
            debug!(media = %id, "dropping result for forgotten preload");
            return None;
        };
        if task.discard || self.shut_down {
            self.tasks.remove(&id);
            debug!(media = %id, "discarded completed preload");
            return Some(PreloadEvent::Discarded(id));
        }
        match result {
            Ok(image) => {
                let task = self.tasks.remove(&id)?;
                let entry = PreloadCacheEntry {
                    url: task.media.url,
                    loaded_at: SystemTime::now(),
                    size_estimate: image.size_estimate(),
                    width: image.width,
                    height: image.height,
                    palette: image.palette,
                };
                self.resident_bytes += entry.size_estimate;
                self.counters.completed += 1;
                debug!(
                    media = %id,
                    bytes = entry.size_estimate,
                    resident = self.resident_bytes,
                    "preload complete"
                );
                self.loaded.insert(id.clone(), entry);
                Some(PreloadEvent::Loaded(id))
            }
            Err(err) => {
                task.attempts += 1;
                if task.attempts < self.options.max_attempts {
                    let delay = self.options.backoff(task.attempts);
                    task.state = TaskState::Queued;
                    task.not_before = Some(now + delay);
                    self.queue.insert((task.priority, task.seq, id.clone()));
                    self.counters.retries += 1;
                    debug!(
                        media = %id,
                        attempts = task.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "preload failed; retrying"
                    );
                    None
                } else {
                    let attempts = task.attempts;
                    self.tasks.remove(&id);
                    self.failed.insert(id.clone());
                    self.counters.failed += 1;
                    warn!(media = %id, attempts, error = %err, "preload failed permanently");
                    Some(PreloadEvent::Failed(id))
                }
            }
        }
    }

    fn apply_memory_sample(&mut self, sample: MemorySample) {
        let used = sample.used_fraction();
        let over_budget = self.resident_bytes > self.options.max_cache_bytes;
        let configured = self.options.horizon.max(1);
        if used >= self.options.high_water || over_budget {
            if !self.under_pressure {
                self.under_pressure = true;
                self.counters.memory_pressure_events += 1;
                warn!(
                    used = f64::from(used),
                    resident = self.resident_bytes,
                    "memory pressure; throttling preloads"
                );
            }
            self.horizon = self.horizon.saturating_sub(1).max(1);
        } else if self.under_pressure {
            if used < self.options.low_water {
                self.under_pressure = false;
                self.horizon = configured;
                info!(used = f64::from(used), horizon = configured, "memory pressure cleared");
            }
        } else {
            self.horizon = configured;
        }
    }
}

/// Dispatcher: keeps up to `max_concurrent` fetches running, highest priority first.
#[instrument(skip_all)]
pub async fn run<F: Fetcher>(cache: PreloadCache, fetcher: F) -> Result<()> {
    let fetcher = Arc::new(fetcher);
    let cancel = cache.shared.cancel.clone();
    let max_concurrent = cache.state().options.max_concurrent.max(1);
    info!(max_concurrent, "preload dispatcher started");
    let mut in_flight: JoinSet<crate::error::Result<FetchedImage>> = JoinSet::new();
    let mut ids: HashMap<tokio::task::Id, MediaId> = HashMap::new();

    loop {
        let mut wake_at: Option<Instant> = None;
        while in_flight.len() < max_concurrent {
            match cache.next_dispatch(Instant::now()) {
                Dispatch::Start(item) => {
                    debug!(media = %item.id, url = %item.url, "preload started");
                    let id = item.id.clone();
                    let fut = fetcher.fetch(item);
                    let handle = in_flight.spawn(fut);
                    ids.insert(handle.id(), id);
                }
                Dispatch::WaitUntil(at) => {
                    wake_at = Some(at);
                    break;
                }
                Dispatch::Idle => break,
            }
        }

        select! {
            _ = cancel.cancelled() => {
                // let in-flight requests finish on their own; their results go nowhere
                in_flight.detach_all();
                info!(detached = ids.len(), "preload dispatcher stopped");
                break;
            }
            Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                match joined {
                    Ok((task_id, result)) => {
                        if let Some(id) = ids.remove(&task_id) {
                            cache.complete(id, result, Instant::now());
                        }
                    }
                    Err(err) => {
                        if let Some(id) = ids.remove(&err.id()) {
                            let failure =
                                crate::error::Error::Io(std::io::Error::other(err.to_string()));
                            cache.complete(id, Err(failure), Instant::now());
                        }
                    }
                }
            }
            _ = cache.shared.wake.notified() => {}
            _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
        }
    }
    Ok(())
}
