//! Ambient visual effects expressed as declarative parameter curves.
//!
//! A display mode picks an [`EffectKind`]; each kind generates frozen,
//! randomly seeded [`EffectParams`] once per image and layer. The host
//! renderer evaluates [`EffectInstance::params_at`] every frame.

mod curves;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::media::{DisplayMode, MediaId, MediaItem};

pub use curves::{EffectParams, Pan, WIDE_ASPECT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Fade,
    KenBurns,
    Parallax,
    SoftGlow,
    AmbientPulse,
    DreamyReveal,
    StackedReveal,
    CinematicBars,
    ColorHarmony,
    Movement,
}

impl EffectKind {
    /// Effect selection for a playlist display mode.
    pub fn for_mode(mode: DisplayMode) -> Self {
        match mode {
            DisplayMode::Fade | DisplayMode::AutoSort | DisplayMode::Split => Self::Fade,
            DisplayMode::KenBurns => Self::KenBurns,
            DisplayMode::Parallax => Self::Parallax,
            DisplayMode::SoftGlow => Self::SoftGlow,
            DisplayMode::AmbientPulse => Self::AmbientPulse,
            DisplayMode::DreamyReveal => Self::DreamyReveal,
            DisplayMode::StackedReveal => Self::StackedReveal,
            DisplayMode::CinematicBars => Self::CinematicBars,
            DisplayMode::ColorHarmony => Self::ColorHarmony,
            DisplayMode::Movement => Self::Movement,
        }
    }

    /// How long this effect takes to fade in a new image.
    pub fn fade_in(self) -> Duration {
        let ms = match self {
            Self::Fade => 600,
            Self::StackedReveal => 700,
            Self::Parallax | Self::AmbientPulse | Self::Movement => 800,
            Self::CinematicBars => 900,
            Self::KenBurns | Self::ColorHarmony => 1000,
            Self::SoftGlow | Self::DreamyReveal => 1200,
        };
        Duration::from_millis(ms)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Fade => "fade",
            Self::KenBurns => "ken_burns",
            Self::Parallax => "parallax",
            Self::SoftGlow => "soft_glow",
            Self::AmbientPulse => "ambient_pulse",
            Self::DreamyReveal => "dreamy_reveal",
            Self::StackedReveal => "stacked_reveal",
            Self::CinematicBars => "cinematic_bars",
            Self::ColorHarmony => "color_harmony",
            Self::Movement => "movement",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that shape generation but are not part of the image itself.
#[derive(Debug, Clone)]
pub struct EffectContext {
    pub interval: Duration,
    pub palette: Option<Vec<[u8; 3]>>,
    /// Motion already chosen for layer 0 of the same layout.
    pub lead_pan: Option<Pan>,
}

/// Per-frame visual parameters for one layer.
///
/// `position` is an offset from center as a fraction of the viewport,
/// `letterbox` the height of each cinematic bar as a fraction of the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameParams {
    pub scale: f32,
    pub position: (f32, f32),
    pub rotation_deg: f32,
    pub opacity: f32,
    pub brightness: f32,
    pub blur: f32,
    pub letterbox: f32,
}

impl FrameParams {
    pub const fn identity() -> Self {
        Self {
            scale: 1.0,
            position: (0.0, 0.0),
            rotation_deg: 0.0,
            opacity: 1.0,
            brightness: 1.0,
            blur: 0.0,
            letterbox: 0.0,
        }
    }

    /// Same frame with any pan/zoom/rotation returned to center.
    pub fn centered(self) -> Self {
        Self {
            scale: 1.0,
            position: (0.0, 0.0),
            rotation_deg: 0.0,
            ..self
        }
    }

    pub fn with_opacity(self, layer_opacity: f32) -> Self {
        Self {
            opacity: (self.opacity * layer_opacity).clamp(0.0, 1.0),
            ..self
        }
    }
}

/// A frozen effect configuration for one image layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectInstance {
    pub media_id: MediaId,
    pub kind: EffectKind,
    pub layer: u8,
    pub params: EffectParams,
}

impl EffectInstance {
    pub fn generate<R: Rng + ?Sized>(
        kind: EffectKind,
        item: &MediaItem,
        layer: u8,
        ctx: &EffectContext,
        rng: &mut R,
    ) -> Self {
        Self {
            media_id: item.id.clone(),
            kind,
            layer,
            params: EffectParams::generate(kind, item, layer, ctx, rng),
        }
    }

    pub fn params_at(&self, elapsed: Duration) -> FrameParams {
        self.params.params_at(elapsed)
    }

    pub fn backdrop(&self) -> Option<&[[u8; 3]]> {
        self.params.backdrop()
    }
}

type EffectKey = (MediaId, EffectKind, u8);

/// Memoizes effect instances by `(media, kind, layer)`.
///
/// An instance is generated the first time its key is requested and reused
/// until [`EffectCache::retain_current`] drops it.
#[derive(Debug, Default)]
pub struct EffectCache {
    instances: HashMap<EffectKey, Arc<EffectInstance>>,
    generated: u64,
}

impl EffectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance<R: Rng + ?Sized>(
        &mut self,
        kind: EffectKind,
        item: &MediaItem,
        layer: u8,
        ctx: &EffectContext,
        rng: &mut R,
    ) -> Arc<EffectInstance> {
        let key = (item.id.clone(), kind, layer);
        if let Some(existing) = self.instances.get(&key) {
            // a follower generated under a different lead is stale
            let follows = ctx.lead_pan.is_none() || existing.params.pan() == ctx.lead_pan;
            if follows {
                return Arc::clone(existing);
            }
        }
        let created = Arc::new(EffectInstance::generate(kind, item, layer, ctx, rng));
        self.generated += 1;
        debug!(media = %item.id, %kind, layer, "effect parameters generated");
        self.instances.insert(key, Arc::clone(&created));
        created
    }

    /// Drop instances whose media is no longer on screen.
    pub fn retain_current<'a, I>(&mut self, current: I)
    where
        I: IntoIterator<Item = &'a MediaId>,
    {
        let keep: Vec<&MediaId> = current.into_iter().collect();
        self.instances.retain(|(id, _, _), _| keep.contains(&id));
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Total number of generations since creation.
    pub fn generated(&self) -> u64 {
        self.generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.into(),
            url: format!("http://frame.local/{id}.jpg"),
            width: 1920,
            height: 1080,
            original_filename: format!("{id}.jpg"),
            captured_at: None,
        }
    }

    fn ctx() -> EffectContext {
        EffectContext {
            interval: Duration::from_secs(30),
            palette: None,
            lead_pan: None,
        }
    }

    #[test]
    fn every_mode_maps_to_an_effect_with_bounded_fade() {
        for mode in DisplayMode::ALL {
            let kind = EffectKind::for_mode(*mode);
            let fade = kind.fade_in();
            assert!(fade >= Duration::from_millis(300) && fade <= Duration::from_millis(1200));
        }
        assert_eq!(EffectKind::for_mode(DisplayMode::AutoSort), EffectKind::Fade);
        assert_eq!(EffectKind::for_mode(DisplayMode::KenBurns), EffectKind::KenBurns);
    }

    #[test]
    fn instances_are_memoized_until_superseded() {
        let mut cache = EffectCache::new();
        let mut rng = StdRng::seed_from_u64(7);
        let a = item("a");
        let first = cache.instance(EffectKind::KenBurns, &a, 0, &ctx(), &mut rng);
        for _ in 0..10 {
            let again = cache.instance(EffectKind::KenBurns, &a, 0, &ctx(), &mut rng);
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(cache.generated(), 1);

        let b = item("b");
        cache.instance(EffectKind::KenBurns, &b, 0, &ctx(), &mut rng);
        cache.retain_current([&b.id]);
        assert_eq!(cache.len(), 1);

        let regenerated = cache.instance(EffectKind::KenBurns, &a, 0, &ctx(), &mut rng);
        assert!(!Arc::ptr_eq(&first, &regenerated));
        assert_eq!(cache.generated(), 3);
    }

    #[test]
    fn centered_resets_motion_but_keeps_light() {
        let frame = FrameParams {
            scale: 1.2,
            position: (0.1, -0.05),
            rotation_deg: 0.7,
            opacity: 0.8,
            brightness: 1.1,
            blur: 2.0,
            letterbox: 0.0,
        };
        let centered = frame.centered().with_opacity(0.5);
        assert_eq!(centered.scale, 1.0);
        assert_eq!(centered.position, (0.0, 0.0));
        assert_eq!(centered.rotation_deg, 0.0);
        assert!((centered.opacity - 0.4).abs() < 1e-6);
        assert_eq!(centered.brightness, 1.1);
    }
}
