//! Discord embeds for command replies and playback status.

pub mod embeds;
