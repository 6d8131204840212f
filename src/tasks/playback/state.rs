use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::effects::{EffectCache, EffectContext, EffectInstance, EffectKind, FrameParams};
use crate::events::{HostEvent, PlaybackCommand};
use crate::media::{DisplayMode, MAX_INTERVAL, MediaId, MediaItem};
use crate::processing::layout::{LayoutDecision, decide_at};
use crate::tasks::preload::PreloadCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    DisplayingSingle,
    DisplayingSplit,
    FadingOut,
    Paused,
    AdvancingIndex,
    WaitingForLoad,
    FadingIn,
    Closed,
}

impl Phase {
    pub fn is_steady(self) -> bool {
        matches!(self, Self::DisplayingSingle | Self::DisplayingSplit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub fade_out: Duration,
    pub pause: Duration,
    pub load_timeout: Duration,
    /// Overrides the effect's own fade-in when set.
    pub fade_in: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fade_out: Duration::from_millis(500),
            pause: Duration::from_millis(300),
            load_timeout: Duration::from_secs(2),
            fade_in: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub display_mode: DisplayMode,
    pub interval: Duration,
    pub looping: bool,
    pub show_info: bool,
    pub timing: Timing,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::default(),
            interval: Duration::from_secs(30),
            looping: true,
            show_info: false,
            timing: Timing::default(),
        }
    }
}

/// Every deadline the orchestrator may have armed; at most one of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timers {
    pub auto_advance: Option<Instant>,
    pub phase: Option<Instant>,
    pub load_fallback: Option<Instant>,
}

impl Timers {
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.load_fallback, self.phase, self.auto_advance]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn pending(&self) -> usize {
        [self.load_fallback, self.phase, self.auto_advance]
            .into_iter()
            .flatten()
            .count()
    }

    fn clear_all(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub index: usize,
    pub phase: Phase,
    pub is_playing: bool,
    pub timers: Timers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Auto,
    Forward,
    Back,
}

/// Snapshot for a renderer: what is on screen and how to draw it at a given instant.
#[derive(Debug, Clone)]
pub struct DisplayView {
    pub phase: Phase,
    pub index: usize,
    pub is_playing: bool,
    pub layout: Option<LayoutDecision>,
    pub effects: Vec<Arc<EffectInstance>>,
    pub ready: Vec<bool>,
    pub degraded: bool,
    pub caption: Option<String>,
    phase_started: Instant,
    phase_length: Option<Duration>,
    shown_at: Instant,
}

impl DisplayView {
    pub fn idle(now: Instant) -> Self {
        Self {
            phase: Phase::Idle,
            index: 0,
            is_playing: false,
            layout: None,
            effects: Vec::new(),
            ready: Vec::new(),
            degraded: false,
            caption: None,
            phase_started: now,
            phase_length: None,
            shown_at: now,
        }
    }

    /// Opacity shared by all layers for the current phase.
    pub fn layer_opacity(&self, now: Instant) -> f32 {
        let t = match self.phase_length {
            Some(len) if !len.is_zero() => {
                (now.saturating_duration_since(self.phase_started).as_secs_f32() / len.as_secs_f32())
                    .clamp(0.0, 1.0)
            }
            _ => 1.0,
        };
        match self.phase {
            Phase::FadingIn => t,
            Phase::FadingOut => 1.0 - t,
            Phase::DisplayingSingle | Phase::DisplayingSplit => 1.0,
            _ => 0.0,
        }
    }

    /// Frame parameters for one layer; pans and zooms return to center while fading out.
    pub fn layer_params(&self, layer: usize, now: Instant) -> Option<FrameParams> {
        let effect = self.effects.get(layer)?;
        let params = effect.params_at(now.saturating_duration_since(self.shown_at));
        let params = if self.phase == Phase::FadingOut {
            params.centered()
        } else {
            params
        };
        Some(params.with_opacity(self.layer_opacity(now)))
    }
}

/// The playback state machine.
///
/// Time is injected by the caller; every transition goes through a named
/// method, and the only way time advances the machine is [`Orchestrator::on_deadline`].
pub struct Orchestrator {
    items: Vec<MediaItem>,
    settings: PlaybackSettings,
    cache: PreloadCache,
    state: PlaybackState,
    layout: Option<LayoutDecision>,
    pending: Option<Step>,
    degraded: bool,
    phase_started: Instant,
    shown_at: Instant,
    effects: EffectCache,
    current_effects: Vec<Arc<EffectInstance>>,
    rng: StdRng,
    sequence: u64,
}

/// Timer instant `after` from `at`; waits longer than a day are capped.
fn deadline(at: Instant, after: Duration) -> Instant {
    at + after.min(MAX_INTERVAL)
}

impl Orchestrator {
    pub fn new(
        items: Vec<MediaItem>,
        settings: PlaybackSettings,
        cache: PreloadCache,
        rng: StdRng,
        now: Instant,
    ) -> Self {
        Self {
            items,
            settings,
            cache,
            state: PlaybackState {
                index: 0,
                phase: Phase::Idle,
                is_playing: true,
                timers: Timers::default(),
            },
            layout: None,
            pending: None,
            degraded: false,
            phase_started: now,
            shown_at: now,
            effects: EffectCache::new(),
            current_effects: Vec::new(),
            rng,
            sequence: 0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn layout(&self) -> Option<&LayoutDecision> {
        self.layout.as_ref()
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn cache(&self) -> &PreloadCache {
        &self.cache
    }

    pub fn current_effects(&self) -> &[Arc<EffectInstance>] {
        &self.current_effects
    }

    pub fn effect_kind(&self) -> EffectKind {
        EffectKind::for_mode(self.settings.display_mode)
    }

    pub fn is_transitioning(&self) -> bool {
        !self.state.phase.is_steady()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.timers.next_deadline()
    }

    /// Leave `Idle`: plan the first layout and wait for its pixels.
    pub fn start(&mut self, now: Instant) -> Vec<HostEvent> {
        if self.state.phase != Phase::Idle || self.layout.is_some() {
            return Vec::new();
        }
        if self.items.is_empty() {
            warn!("playlist is empty; showing placeholder");
            return vec![HostEvent::EmptyPlaylist];
        }
        self.layout = self.plan(Step::Auto);
        info!(
            items = self.items.len(),
            mode = %self.settings.display_mode,
            interval_secs = self.settings.interval.as_secs(),
            looping = self.settings.looping,
            "playback starting"
        );
        self.refresh_preload();
        self.enter_waiting(now);
        Vec::new()
    }

    pub fn handle_command(&mut self, cmd: PlaybackCommand, now: Instant) -> Vec<HostEvent> {
        match cmd {
            PlaybackCommand::Close => return self.close(),
            PlaybackCommand::TogglePlay => self.set_playing(!self.state.is_playing, now),
            PlaybackCommand::SetPlaying(playing) => self.set_playing(playing, now),
            PlaybackCommand::Next => self.navigate(Step::Forward, now),
            PlaybackCommand::Previous => self.navigate(Step::Back, now),
        }
        Vec::new()
    }

    /// A preload finished somewhere; re-check the images we are waiting for.
    pub fn on_preload_event(&mut self, now: Instant) -> Vec<HostEvent> {
        if self.awaiting_load() && self.layout_settled() {
            self.degraded = self.layout_has_failures();
            self.begin_fade_in(now);
        }
        Vec::new()
    }

    /// Fire every deadline at or before `now`, oldest first.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<HostEvent> {
        let mut out = Vec::new();
        while let Some(due) = self.next_deadline().filter(|at| *at <= now) {
            let timers = &mut self.state.timers;
            if timers.load_fallback == Some(due) {
                timers.load_fallback = None;
                self.load_timed_out(due);
            } else if timers.phase == Some(due) {
                timers.phase = None;
                self.phase_elapsed(due, &mut out);
            } else {
                timers.auto_advance = None;
                self.auto_advance(due);
            }
        }
        out
    }

    /// Tear down: clear every deadline and stop preloading. Idempotent.
    pub fn close(&mut self) -> Vec<HostEvent> {
        if self.state.phase == Phase::Closed {
            return Vec::new();
        }
        let unfinished = self.is_transitioning();
        self.state.timers.clear_all();
        self.pending = None;
        self.state.phase = Phase::Closed;
        self.cache.shutdown();
        info!(index = self.state.index, unfinished, "playback closed");
        vec![HostEvent::Closed]
    }

    pub fn view(&self) -> DisplayView {
        let phase_length = match self.state.phase {
            Phase::FadingIn => Some(self.fade_in_duration()),
            Phase::FadingOut => Some(self.settings.timing.fade_out),
            _ => None,
        };
        let ready = self
            .layout
            .iter()
            .flat_map(|l| l.items())
            .map(|item| self.cache.is_ready(&item.id))
            .collect();
        DisplayView {
            phase: self.state.phase,
            index: self.state.index,
            is_playing: self.state.is_playing,
            layout: self.layout.clone(),
            effects: self.current_effects.clone(),
            ready,
            degraded: self.degraded,
            caption: self.caption(),
            phase_started: self.phase_started,
            phase_length,
            shown_at: self.shown_at,
        }
    }

    fn caption(&self) -> Option<String> {
        if !self.settings.show_info {
            return None;
        }
        let item = &self.layout.as_ref()?.primary;
        Some(match item.captured_at {
            Some(at) => format!("{} ({})", item.original_filename, at.format("%Y-%m-%d")),
            None => item.original_filename.clone(),
        })
    }

    fn set_playing(&mut self, playing: bool, now: Instant) {
        if self.state.phase == Phase::Closed {
            return;
        }
        self.state.is_playing = playing;
        if !playing {
            self.state.timers.auto_advance = None;
        } else if self.state.phase.is_steady() && self.state.timers.auto_advance.is_none() {
            self.state.timers.auto_advance = Some(deadline(now, self.settings.interval));
        }
        debug!(playing, index = self.state.index, "play state changed");
    }

    fn navigate(&mut self, step: Step, now: Instant) {
        if self.state.phase == Phase::Closed || self.items.is_empty() {
            return;
        }
        if self.is_transitioning() {
            debug!(?step, phase = ?self.state.phase, "navigation ignored mid-transition");
            return;
        }
        if self.target_for(step) == self.state.index {
            debug!(?step, index = self.state.index, "navigation holds at sequence edge");
            return;
        }
        self.pending = Some(step);
        self.enter_fading_out(now);
    }

    fn auto_advance(&mut self, due: Instant) {
        if !self.state.phase.is_steady() || !self.state.is_playing {
            return;
        }
        if self.target_for(Step::Auto) == self.state.index {
            info!(index = self.state.index, "end of sequence; holding");
            return;
        }
        self.pending = Some(Step::Auto);
        self.enter_fading_out(due);
    }

    fn phase_elapsed(&mut self, due: Instant, out: &mut Vec<HostEvent>) {
        match self.state.phase {
            Phase::FadingOut => self.enter_phase(Phase::Paused, due, Some(self.settings.timing.pause)),
            Phase::Paused => self.advance_index(due),
            Phase::FadingIn => self.settle(due, out),
            _ => {}
        }
    }

    fn load_timed_out(&mut self, due: Instant) {
        if !self.awaiting_load() {
            return;
        }
        let media = self.layout.as_ref().map(|l| l.primary.id.clone());
        warn!(
            index = self.state.index,
            media = ?media.as_ref().map(MediaId::as_str),
            timeout_ms = self.settings.timing.load_timeout.as_millis() as u64,
            "load timeout; showing placeholder"
        );
        self.degraded = true;
        self.begin_fade_in(due);
    }

    fn enter_phase(&mut self, phase: Phase, at: Instant, length: Option<Duration>) {
        self.state.phase = phase;
        self.phase_started = at;
        self.state.timers.phase = length.map(|len| deadline(at, len));
    }

    fn enter_fading_out(&mut self, at: Instant) {
        self.state.timers.auto_advance = None;
        self.enter_phase(Phase::FadingOut, at, Some(self.settings.timing.fade_out));
    }

    fn advance_index(&mut self, at: Instant) {
        self.enter_phase(Phase::AdvancingIndex, at, None);
        let step = self.pending.take().unwrap_or(Step::Auto);
        let from = self.state.index;
        self.state.index = self.target_for(step);
        self.layout = self.plan(step);
        debug!(from, to = self.state.index, ?step, "advancing index");
        self.refresh_preload();
        self.enter_waiting(at);
    }

    fn enter_waiting(&mut self, at: Instant) {
        // the very first load is reported as Idle
        if self.state.phase != Phase::Idle {
            self.enter_phase(Phase::WaitingForLoad, at, None);
        }
        self.degraded = false;
        if self.layout_settled() {
            self.degraded = self.layout_has_failures();
            self.begin_fade_in(at);
        } else {
            self.state.timers.load_fallback = Some(deadline(at, self.settings.timing.load_timeout));
        }
    }

    fn begin_fade_in(&mut self, at: Instant) {
        self.state.timers.load_fallback = None;
        self.shown_at = at;
        self.refresh_effects();
        self.enter_phase(Phase::FadingIn, at, Some(self.fade_in_duration()));
    }

    fn settle(&mut self, at: Instant, out: &mut Vec<HostEvent>) {
        let Some(layout) = self.layout.clone() else {
            return;
        };
        let phase = if layout.is_split() {
            Phase::DisplayingSplit
        } else {
            Phase::DisplayingSingle
        };
        self.enter_phase(phase, at, None);
        self.sequence += 1;
        info!(
            index = self.state.index,
            media = %layout.primary.id,
            split = layout.is_split(),
            degraded = self.degraded,
            sequence = self.sequence,
            "image settled"
        );
        out.push(HostEvent::ImageChanged {
            item: layout.primary,
            secondary: layout.secondary,
            index: self.state.index,
            layout: layout.mode,
            degraded: self.degraded,
            sequence: self.sequence,
        });
        if self.state.is_playing {
            self.state.timers.auto_advance = Some(deadline(at, self.settings.interval));
        }
    }

    fn fade_in_duration(&self) -> Duration {
        self.settings
            .timing
            .fade_in
            .unwrap_or_else(|| self.effect_kind().fade_in())
    }

    fn awaiting_load(&self) -> bool {
        match self.state.phase {
            Phase::WaitingForLoad => true,
            Phase::Idle => self.layout.is_some(),
            _ => false,
        }
    }

    /// Every image in the layout is either resident or has given up.
    fn layout_settled(&self) -> bool {
        self.layout.as_ref().is_some_and(|layout| {
            layout
                .items()
                .all(|item| self.cache.is_ready(&item.id) || self.cache.is_failed(&item.id))
        })
    }

    fn layout_has_failures(&self) -> bool {
        self.layout.as_ref().is_some_and(|layout| {
            layout.items().any(|item| !self.cache.is_ready(&item.id))
        })
    }

    fn target_for(&self, step: Step) -> usize {
        let len = self.items.len();
        if len == 0 {
            return 0;
        }
        let last = len - 1;
        let index = self.state.index;
        match step {
            Step::Back => {
                if index > 0 {
                    index - 1
                } else if self.settings.looping {
                    last
                } else {
                    0
                }
            }
            Step::Auto | Step::Forward => {
                let by = match step {
                    Step::Auto => self.layout.as_ref().map_or(1, |l| l.advance_by),
                    _ => 1,
                };
                let raw = index + by;
                if raw <= last {
                    raw
                } else if self.settings.looping {
                    raw % len
                } else {
                    last
                }
            }
        }
    }

    /// Layout at the current index. Manual steps land on a single image.
    fn plan(&self, step: Step) -> Option<LayoutDecision> {
        match step {
            Step::Auto => decide_at(&self.items, self.state.index, self.settings.display_mode),
            Step::Forward | Step::Back => self
                .items
                .get(self.state.index)
                .cloned()
                .map(LayoutDecision::single),
        }
    }

    /// Schedule everything within the horizon ahead of the playhead and evict the rest.
    fn refresh_preload(&mut self) {
        let len = self.items.len();
        if len == 0 {
            return;
        }
        let horizon = self.cache.horizon();
        let on_screen: Vec<MediaId> = self
            .layout
            .iter()
            .flat_map(|l| l.items())
            .map(|item| item.id.clone())
            .collect();
        let mut window: Vec<MediaId> = Vec::with_capacity(horizon + 1);
        for distance in 0..=horizon {
            let raw = self.state.index + distance;
            let idx = if raw < len {
                raw
            } else if self.settings.looping {
                raw % len
            } else {
                break;
            };
            let item = &self.items[idx];
            if window.contains(&item.id) {
                continue;
            }
            let priority = if on_screen.contains(&item.id) {
                0
            } else {
                distance as u32
            };
            self.cache.schedule(item, priority);
            window.push(item.id.clone());
        }
        for id in &on_screen {
            if !window.contains(id) {
                window.push(id.clone());
            }
        }
        self.cache.retain_window(&window);
    }

    fn refresh_effects(&mut self) {
        let kind = self.effect_kind();
        let Some(layout) = self.layout.as_ref() else {
            self.current_effects.clear();
            return;
        };
        let items: Vec<MediaItem> = layout.items().cloned().collect();
        self.effects.retain_current(items.iter().map(|item| &item.id));
        self.current_effects.clear();
        let mut lead_pan = None;
        for (layer, item) in items.iter().enumerate() {
            let ctx = EffectContext {
                interval: self.settings.interval,
                palette: self.cache.palette(&item.id),
                lead_pan,
            };
            let instance = self
                .effects
                .instance(kind, item, layer as u8, &ctx, &mut self.rng);
            if layer == 0 {
                lead_pan = instance.params.pan();
            }
            self.current_effects.push(instance);
        }
    }
}
