//! Resolución de pistas: consulta → metadata, y source id → URL de stream.

pub mod youtube;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::{
    audio::{error::ResolutionFailure, track::Track},
    cache::MetadataCache,
};

pub use youtube::YtDlpResolver;

/// Resolvedor externo de pistas (yt-dlp en producción).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Busca metadata para una URL o texto libre.
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionFailure>;

    /// URL reproducible para un `source_id`. Caduca: no se guarda en cache.
    async fn resolve_stream_url(&self, source_id: &str) -> Result<String, ResolutionFailure>;
}

/// `true` si la consulta es un enlace http(s) y no texto de búsqueda.
pub fn is_url(query: &str) -> bool {
    Url::parse(query.trim()).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Decorador que cachea `resolve` por consulta.
pub struct CachedResolver {
    inner: Arc<dyn TrackResolver>,
    cache: Arc<MetadataCache>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn TrackResolver>, cache: Arc<MetadataCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl TrackResolver for CachedResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionFailure> {
        if let Some(track) = self.cache.get(query) {
            debug!("💾 Cache hit para: {}", query);
            return Ok(track);
        }

        let track = self.inner.resolve(query).await?;
        self.cache.put(query, track.clone());
        Ok(track)
    }

    async fn resolve_stream_url(&self, source_id: &str) -> Result<String, ResolutionFailure> {
        self.inner.resolve_stream_url(source_id).await
    }
}
