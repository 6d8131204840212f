use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One displayable image as described by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: MediaId,
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(alias = "originalFilename", default)]
    pub original_filename: String,
    #[serde(alias = "capturedAt", default)]
    pub captured_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// How a playlist wants its images presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Fade,
    AutoSort,
    Split,
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

impl DisplayMode {
    pub const ALL: &'static [Self] = &[
        Self::Fade,
        Self::AutoSort,
        Self::Split,
        Self::KenBurns,
        Self::Parallax,
        Self::SoftGlow,
        Self::AmbientPulse,
        Self::DreamyReveal,
        Self::StackedReveal,
        Self::CinematicBars,
        Self::ColorHarmony,
        Self::Movement,
    ];

    /// Modes that place two adjacent landscape images on screen together.
    pub fn supports_pairing(self) -> bool {
        matches!(
            self,
            Self::AutoSort | Self::Split | Self::Parallax | Self::StackedReveal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fade => "fade",
            Self::AutoSort => "auto_sort",
            Self::Split => "split",
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

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest dwell time a playlist may ask for.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const fn default_interval_seconds() -> u64 {
    30
}

const fn default_loop() -> bool {
    true
}

/// Playlist record owned by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub sequence: Vec<MediaId>,
    #[serde(alias = "displayMode", default)]
    pub display_mode: DisplayMode,
    #[serde(alias = "intervalSeconds", default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(rename = "loop", default = "default_loop")]
    pub looping: bool,
}

impl Playlist {
    /// Dwell time per layout, clamped to `1s..=MAX_INTERVAL`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.clamp(1, MAX_INTERVAL.as_secs()))
    }
}
