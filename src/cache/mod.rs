//! # Cache Module
//!
//! TTL cache for resolved track metadata, keyed by the normalized query a
//! user typed in `/play`. Repeated requests for the same song skip the
//! `yt-dlp --dump-json` round trip.
//!
//! Stream URLs are never cached: they are signed and expire within hours.
//!
//! ```env
//! METADATA_CACHE_TTL=3600       # Seconds a resolved track stays cached
//! METADATA_CACHE_CAPACITY=1000  # Max cached queries
//! ```
//!
//! Free-text searches are case-insensitive; URLs keep their case because
//! video ids are case-sensitive.

pub mod ttl_cache;

use std::time::Duration;
use tracing::info;

use crate::{audio::track::Track, sources::is_url};
use ttl_cache::TtlCache;

/// Cache de metadata: consulta normalizada → track resuelto.
pub struct MetadataCache {
    tracks: TtlCache<String, Track>,
}

impl MetadataCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            tracks: TtlCache::new(ttl, capacity),
        }
    }

    pub fn get(&self, query: &str) -> Option<Track> {
        self.tracks.get(&Self::key(query))
    }

    pub fn put(&self, query: &str, track: Track) {
        self.tracks.insert(Self::key(query), track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Elimina entradas vencidas; pensado para una tarea periódica.
    pub fn cleanup_old_entries(&self) {
        let removed = self.tracks.cleanup_expired();
        if removed > 0 {
            let metrics = self.tracks.metrics();
            info!(
                "🧹 Cache de metadata: {} entradas vencidas eliminadas, quedan {}/{} (hit rate {:.0}%)",
                removed,
                self.len(),
                self.tracks.capacity(),
                metrics.hit_rate() * 100.0
            );
        }
    }

    fn key(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            query.to_lowercase()
        }
    }
}
