//! Frozen per-image effect parameters and their time curves.
//!
//! Every variant is generated once from an RNG and afterwards only evaluated;
//! `params_at` never mutates and never consults randomness.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::media::MediaItem;
use crate::processing::color::NEUTRAL_GRAY;

use super::{EffectContext, EffectKind, FrameParams};

/// Aspect ratio above which a landscape image is considered wide enough to pan.
pub const WIDE_ASPECT: f32 = 1.6;

/// Horizontal travel shared by every layer of a parallax layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pan {
    pub direction: f32,
    pub distance: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectParams {
    Fade,
    KenBurns {
        start_scale: f32,
        end_scale: f32,
        pan_to: (f32, f32),
        rotation_deg: f32,
        duration_ms: u64,
    },
    Parallax {
        direction: f32,
        distance: f32,
        depth: f32,
        scale: f32,
        duration_ms: u64,
    },
    SoftGlow {
        peak_brightness: f32,
        peak_blur: f32,
        glow_ms: u64,
    },
    AmbientPulse {
        period_ms: u64,
        brightness_amplitude: f32,
        scale_amplitude: f32,
        phase: f32,
    },
    DreamyReveal {
        start_blur: f32,
        start_scale: f32,
        reveal_ms: u64,
    },
    StackedReveal {
        from: (f32, f32),
        delay_ms: u64,
        slide_ms: u64,
    },
    CinematicBars {
        bar_fraction: f32,
        hold_ms: u64,
        fade_ms: u64,
    },
    ColorHarmony {
        wash: Vec<[u8; 3]>,
        wash_blur: f32,
        wash_opacity: f32,
        drift: (f32, f32),
        duration_ms: u64,
    },
    Movement {
        travel: f32,
        duration_ms: u64,
    },
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn ease_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

fn progress(elapsed: Duration, total_ms: u64) -> f32 {
    if total_ms == 0 {
        return 1.0;
    }
    (elapsed.as_secs_f32() * 1000.0 / total_ms as f32).clamp(0.0, 1.0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn jittered_ms<R: Rng + ?Sized>(interval: Duration, rng: &mut R) -> u64 {
    let base = interval.as_millis().min(u128::from(u64::MAX)) as f64;
    (base * rng.random_range(0.9..=1.1)).round().max(1.0) as u64
}

fn random_sign<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    if rng.random_bool(0.5) { 1.0 } else { -1.0 }
}

/// Maximum pan offset (fraction of the viewport) that keeps a zoomed image covering it.
///
/// Landscape images get more horizontal room, portrait images more vertical room.
fn safe_margin(item: &MediaItem, scale: f32) -> (f32, f32) {
    let slack = ((scale - 1.0) / 2.0).max(0.0);
    if item.is_landscape() {
        (slack, slack * 0.5)
    } else {
        (slack * 0.5, slack)
    }
}

const PARALLAX_SCALE: f32 = 1.12;

impl EffectParams {
    pub(crate) fn generate<R: Rng + ?Sized>(
        kind: EffectKind,
        item: &MediaItem,
        layer: u8,
        ctx: &EffectContext,
        rng: &mut R,
    ) -> Self {
        match kind {
            EffectKind::Fade => Self::Fade,
            EffectKind::KenBurns => {
                let near = rng.random_range(1.05..=1.08);
                let far = rng.random_range(1.15..=1.25);
                let (start_scale, end_scale) = if rng.random_bool(0.5) {
                    (near, far)
                } else {
                    (far, near)
                };
                // the pan must stay covered at the tightest zoom of the move
                let (mx, my) = safe_margin(item, near);
                let pan_to = (rng.random_range(-mx..=mx), rng.random_range(-my..=my));
                Self::KenBurns {
                    start_scale,
                    end_scale,
                    pan_to,
                    rotation_deg: rng.random_range(-1.0..=1.0),
                    duration_ms: jittered_ms(ctx.interval, rng),
                }
            }
            EffectKind::Parallax => {
                // the back layer covers a fraction of the lead layer's travel
                let depth = if layer == 0 { 1.0 } else { 0.6 };
                let pan = ctx.lead_pan.unwrap_or_else(|| {
                    let (mx, _) = safe_margin(item, PARALLAX_SCALE);
                    Pan {
                        direction: random_sign(rng),
                        distance: rng.random_range(0.5..=1.0) * mx,
                        duration_ms: jittered_ms(ctx.interval, rng),
                    }
                });
                Self::Parallax {
                    direction: pan.direction,
                    distance: pan.distance,
                    depth,
                    scale: PARALLAX_SCALE,
                    duration_ms: pan.duration_ms,
                }
            }
            EffectKind::SoftGlow => Self::SoftGlow {
                peak_brightness: rng.random_range(1.12..=1.25),
                peak_blur: rng.random_range(4.0..=8.0),
                glow_ms: rng.random_range(1500..=2500),
            },
            EffectKind::AmbientPulse => Self::AmbientPulse {
                period_ms: rng.random_range(6000..=10000),
                brightness_amplitude: rng.random_range(0.03..=0.06),
                scale_amplitude: rng.random_range(0.005..=0.012),
                phase: rng.random_range(0.0..std::f32::consts::TAU),
            },
            EffectKind::DreamyReveal => Self::DreamyReveal {
                start_blur: rng.random_range(10.0..=16.0),
                start_scale: rng.random_range(1.05..=1.1),
                reveal_ms: rng.random_range(1500..=2500),
            },
            EffectKind::StackedReveal => {
                let from = if layer == 0 { (0.0, -0.5) } else { (0.0, 0.5) };
                let stagger = rng.random_range(200..=400);
                Self::StackedReveal {
                    from,
                    delay_ms: u64::from(layer) * stagger,
                    slide_ms: rng.random_range(700..=1000),
                }
            }
            EffectKind::CinematicBars => Self::CinematicBars {
                bar_fraction: rng.random_range(0.08..=0.12),
                hold_ms: rng.random_range(2000..=4000),
                fade_ms: rng.random_range(800..=1500),
            },
            EffectKind::ColorHarmony => {
                let wash = match &ctx.palette {
                    Some(colors) if !colors.is_empty() => colors.iter().take(3).copied().collect(),
                    _ => vec![NEUTRAL_GRAY],
                };
                Self::ColorHarmony {
                    wash,
                    wash_blur: rng.random_range(40.0..=60.0),
                    wash_opacity: rng.random_range(0.5..=0.7),
                    drift: (
                        rng.random_range(-0.03..=0.03),
                        rng.random_range(-0.03..=0.03),
                    ),
                    duration_ms: jittered_ms(ctx.interval, rng),
                }
            }
            EffectKind::Movement => {
                let travel = if item.is_landscape() && item.aspect_ratio() >= WIDE_ASPECT {
                    random_sign(rng) * rng.random_range(0.04..=0.08)
                } else {
                    0.0
                };
                Self::Movement {
                    travel,
                    duration_ms: jittered_ms(ctx.interval, rng),
                }
            }
        }
    }

    pub fn params_at(&self, elapsed: Duration) -> FrameParams {
        let base = FrameParams::identity();
        match self {
            Self::Fade => base,
            Self::KenBurns {
                start_scale,
                end_scale,
                pan_to,
                rotation_deg,
                duration_ms,
            } => {
                let t = smoothstep(progress(elapsed, *duration_ms));
                FrameParams {
                    scale: lerp(*start_scale, *end_scale, t),
                    position: (pan_to.0 * t, pan_to.1 * t),
                    rotation_deg: rotation_deg * t,
                    ..base
                }
            }
            Self::Parallax {
                direction,
                distance,
                depth,
                scale,
                duration_ms,
            } => {
                let t = smoothstep(progress(elapsed, *duration_ms));
                let offset = direction * distance * depth;
                FrameParams {
                    scale: *scale,
                    position: (lerp(-offset, offset, t), 0.0),
                    ..base
                }
            }
            Self::SoftGlow {
                peak_brightness,
                peak_blur,
                glow_ms,
            } => {
                // rises over the first third, then settles back
                let t = progress(elapsed, *glow_ms);
                let bloom = if t < 1.0 / 3.0 {
                    smoothstep(t * 3.0)
                } else {
                    1.0 - smoothstep((t - 1.0 / 3.0) * 1.5)
                };
                FrameParams {
                    brightness: lerp(1.0, *peak_brightness, bloom),
                    blur: peak_blur * bloom,
                    ..base
                }
            }
            Self::AmbientPulse {
                period_ms,
                brightness_amplitude,
                scale_amplitude,
                phase,
            } => {
                let period = (*period_ms).max(1) as f32;
                let angle = elapsed.as_secs_f32() * 1000.0 / period * std::f32::consts::TAU + phase;
                let wave = angle.sin();
                FrameParams {
                    scale: 1.0 + scale_amplitude * (wave + 1.0) / 2.0,
                    brightness: 1.0 + brightness_amplitude * wave,
                    ..base
                }
            }
            Self::DreamyReveal {
                start_blur,
                start_scale,
                reveal_ms,
            } => {
                let t = ease_out(progress(elapsed, *reveal_ms));
                FrameParams {
                    scale: lerp(*start_scale, 1.0, t),
                    blur: start_blur * (1.0 - t),
                    opacity: smoothstep(t * 1.5),
                    ..base
                }
            }
            Self::StackedReveal {
                from,
                delay_ms,
                slide_ms,
            } => {
                let since = elapsed.saturating_sub(Duration::from_millis(*delay_ms));
                let started = elapsed >= Duration::from_millis(*delay_ms);
                let t = ease_out(progress(since, *slide_ms));
                FrameParams {
                    position: (from.0 * (1.0 - t), from.1 * (1.0 - t)),
                    opacity: if started { smoothstep(t * 2.0) } else { 0.0 },
                    ..base
                }
            }
            Self::CinematicBars {
                bar_fraction,
                hold_ms,
                fade_ms,
            } => {
                let hold = Duration::from_millis(*hold_ms);
                let visible = if elapsed <= hold {
                    1.0
                } else {
                    1.0 - smoothstep(progress(elapsed - hold, *fade_ms))
                };
                FrameParams {
                    letterbox: bar_fraction * visible,
                    ..base
                }
            }
            Self::ColorHarmony {
                drift, duration_ms, ..
            } => {
                let t = smoothstep(progress(elapsed, *duration_ms));
                FrameParams {
                    scale: lerp(1.0, 1.04, t),
                    position: (drift.0 * t, drift.1 * t),
                    ..base
                }
            }
            Self::Movement {
                travel,
                duration_ms,
            } => {
                let t = progress(elapsed, *duration_ms);
                let scale = 1.0 + 2.0 * travel.abs();
                FrameParams {
                    scale,
                    position: (lerp(-travel, *travel, t), 0.0),
                    ..base
                }
            }
        }
    }

    /// Travel that later layers of the same layout must follow.
    pub fn pan(&self) -> Option<Pan> {
        match self {
            Self::Parallax {
                direction,
                distance,
                duration_ms,
                ..
            } => Some(Pan {
                direction: *direction,
                distance: *distance,
                duration_ms: *duration_ms,
            }),
            _ => None,
        }
    }

    /// Background wash colors for color-harmony, if this is one.
    pub fn backdrop(&self) -> Option<&[[u8; 3]]> {
        match self {
            Self::ColorHarmony { wash, .. } => Some(wash),
            _ => None,
        }
    }
}
