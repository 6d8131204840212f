use crate::media::{MediaId, MediaItem};
use crate::processing::layout::LayoutMode;

/// Completion notices from the preload dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadEvent {
    Loaded(MediaId),
    Failed(MediaId),
    /// Finished after being cancelled or after shutdown; nothing was kept.
    Discarded(MediaId),
}

/// Control input for the playback engine (keyboard, UI, signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Next,
    Previous,
    TogglePlay,
    SetPlaying(bool),
    Close,
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A transition settled on a new image. Emitted once per settled transition.
    ImageChanged {
        item: MediaItem,
        secondary: Option<MediaItem>,
        index: usize,
        layout: LayoutMode,
        /// Shown before its pixels were ready (load timeout or failed fetch).
        degraded: bool,
        sequence: u64,
    },
    /// Nothing to show; the display stays on its placeholder.
    EmptyPlaylist,
    Closed,
}
