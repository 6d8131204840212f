use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;

use crate::media::{DisplayMode, MAX_INTERVAL, Playlist};
use crate::tasks::playback::{PlaybackSettings, Timing};
use crate::tasks::preload::PreloadOptions;

/// Where playlists and media metadata come from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CatalogConfig {
    /// YAML or JSON catalog document on disk.
    pub file: Option<PathBuf>,
    /// Base URL of an HTTP catalog.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    File(PathBuf),
    Http(String),
}

impl CatalogConfig {
    pub fn source(&self) -> Result<CatalogSource> {
        match (&self.file, &self.url) {
            (Some(path), None) => Ok(CatalogSource::File(path.clone())),
            (None, Some(url)) => Ok(CatalogSource::Http(url.clone())),
            (Some(_), Some(_)) => bail!("catalog: set only one of file or url"),
            (None, None) => bail!("catalog: one of file or url is required"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlaybackConfig {
    /// Overrides the playlist's display mode.
    pub display_mode: Option<DisplayMode>,
    /// Overrides the playlist's interval.
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Overrides the playlist's loop flag.
    #[serde(rename = "loop")]
    pub looping: Option<bool>,
    pub shuffle: bool,
    /// Optional deterministic seed for the shuffle and effect parameters.
    pub shuffle_seed: Option<u64>,
    pub show_info: bool,
    pub max_concurrent_preloads: usize,
    pub preload_horizon: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            display_mode: None,
            interval: None,
            looping: None,
            shuffle: false,
            shuffle_seed: None,
            show_info: false,
            max_concurrent_preloads: 3,
            preload_horizon: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimingConfig {
    #[serde(with = "humantime_serde")]
    pub fade_out: Duration,
    #[serde(with = "humantime_serde")]
    pub pause: Duration,
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,
    /// Fixed fade-in; each effect picks its own when unset.
    #[serde(with = "humantime_serde")]
    pub fade_in: Option<Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let timing = Timing::default();
        Self {
            fade_out: timing.fade_out,
            pause: timing.pause,
            load_timeout: timing.load_timeout,
            fade_in: timing.fade_in,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PreloadConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_base: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_cap: Duration,
    /// Per-request timeout for image and catalog fetches.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        let options = PreloadOptions::default();
        Self {
            max_attempts: options.max_attempts,
            retry_base: options.retry_base,
            retry_cap: options.retry_cap,
            fetch_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MemoryConfig {
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// Used-memory fraction at which preloading is throttled.
    pub high_water: f32,
    /// Used-memory fraction below which throttling is lifted.
    pub low_water: f32,
    pub max_cache_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let options = PreloadOptions::default();
        Self {
            monitor_interval: Duration::from_secs(5),
            high_water: options.high_water,
            low_water: options.low_water,
            max_cache_bytes: options.max_cache_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    pub catalog: CatalogConfig,
    /// Playlist to play from the catalog.
    pub playlist_id: String,
    pub playback: PlaybackConfig,
    pub timing: TimingConfig,
    pub preload: PreloadConfig,
    pub memory: MemoryConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&s).with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        self.catalog.source()?;
        ensure!(!self.playlist_id.trim().is_empty(), "playlist-id must be set");
        ensure!(
            self.playback.max_concurrent_preloads > 0,
            "playback.max-concurrent-preloads must be greater than zero"
        );
        ensure!(
            self.playback.preload_horizon > 0,
            "playback.preload-horizon must be greater than zero"
        );
        if let Some(interval) = self.playback.interval {
            ensure!(
                interval >= Duration::from_secs(1),
                "playback.interval must be at least 1s"
            );
            ensure!(
                interval <= MAX_INTERVAL,
                "playback.interval must not exceed 24h"
            );
        }
        ensure!(
            self.timing.load_timeout > Duration::ZERO,
            "timing.load-timeout must be positive"
        );
        ensure!(
            self.preload.max_attempts >= 1,
            "preload.max-attempts must be >= 1"
        );
        ensure!(
            self.preload.retry_base <= self.preload.retry_cap,
            "preload.retry-base must not exceed preload.retry-cap"
        );
        ensure!(
            self.preload.fetch_timeout > Duration::ZERO,
            "preload.fetch-timeout must be positive"
        );
        ensure!(
            self.memory.monitor_interval > Duration::ZERO,
            "memory.monitor-interval must be positive"
        );
        ensure!(
            0.0 < self.memory.low_water
                && self.memory.low_water < self.memory.high_water
                && self.memory.high_water <= 1.0,
            "memory water marks must satisfy 0 < low-water < high-water <= 1"
        );
        Ok(self)
    }

    pub fn preload_options(&self) -> PreloadOptions {
        PreloadOptions {
            max_concurrent: self.playback.max_concurrent_preloads,
            horizon: self.playback.preload_horizon,
            max_attempts: self.preload.max_attempts,
            retry_base: self.preload.retry_base,
            retry_cap: self.preload.retry_cap,
            max_cache_bytes: self.memory.max_cache_bytes,
            high_water: self.memory.high_water,
            low_water: self.memory.low_water,
        }
    }

    /// Merge overrides with the playlist's own settings.
    pub fn playback_settings(&self, playlist: &Playlist) -> PlaybackSettings {
        PlaybackSettings {
            display_mode: self.playback.display_mode.unwrap_or(playlist.display_mode),
            interval: self.playback.interval.unwrap_or_else(|| playlist.interval()),
            looping: self.playback.looping.unwrap_or(playlist.looping),
            show_info: self.playback.show_info,
            timing: Timing {
                fade_out: self.timing.fade_out,
                pause: self.timing.pause,
                load_timeout: self.timing.load_timeout,
                fade_in: self.timing.fade_in,
            },
        }
    }
}
