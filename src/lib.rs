pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod media;
pub mod processing {
    pub mod color;
    pub mod layout;
}
pub mod tasks {
    pub mod fetch;
    pub mod memory;
    pub mod playback;
    pub mod preload;
}

pub use error::{Error, Result};
