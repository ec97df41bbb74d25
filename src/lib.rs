//! SyncPlayer - audio/video playback synchronization engine
//!
//! A decode worker fills a bounded frame buffer and an audio ring buffer;
//! the audio device drains the ring from its own callback thread while a
//! render tick promotes frames on a presentation clock. The
//! [`player::PlaybackController`] ties them together behind play, pause,
//! seek and stop.

pub mod audio;
pub mod decoder;
pub mod player;
pub mod renderer;
pub mod utils;

pub use player::{PlaybackController, PlaybackSnapshot, PlaybackState, PlaybackStats, PlayerEvent};
pub use utils::{Config, Result, SyncPlayerError};
