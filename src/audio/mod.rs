//! # Audio Module
//!
//! Per-guild voice sessions and the sequential playback engine.
//!
//! ## Architecture
//!
//! ### [`connection`] - Connection Registry
//! - At most one live voice connection per guild
//! - Per-guild lifecycle lock for connect/disconnect, never a global one
//! - Generation-tagged disconnect notices so a stale drop never retires a newer connection
//!
//! ### [`session`] - Guild Sessions
//! - Pending queue (consumed by the worker) plus the display queue users see
//! - Atomic `playing` claim: exactly one worker per guild
//!
//! ### [`engine`] - Playback Worker
//! - Resolve → announce → transcode → stream → cleanup, one track at a time
//! - Per-track failures are reported and skipped; streaming failures tear the guild down
//!
//! ### [`transcoder`] - ffmpeg Subprocess
//! - f32le, 48 kHz, stereo PCM on stdout, read in fixed-size chunks
//! - Killed and reaped on cancellation
//!
//! ### [`songbird_voice`] - Discord Transport
//! - songbird-backed implementations of the connection traits
//!
//! ### [`service`] - Command Facade
//! - `join`, `leave`, `play`, `queue` with typed outcomes for the bot layer

pub mod connection;
pub mod engine;
pub mod error;
pub mod service;
pub mod session;
pub mod songbird_voice;
pub mod status;
pub mod track;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod testing;
