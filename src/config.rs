use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::audio::transcoder::FRAME_BYTES;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Conexión y teardown
    pub connect_warmup: Duration,
    pub teardown_timeout: Duration,
    pub sink_drain_timeout: Duration,

    // Procesos externos
    pub transcoder_path: String,
    pub ytdlp_path: String,

    // Audio
    pub pcm_chunk_size: usize,
    pub sink_buffer_chunks: usize,

    // Cache
    pub metadata_cache_ttl: Duration,
    pub metadata_cache_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración desde cualquier fuente clave → valor.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64)?))
        };

        let config = Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN no está definido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            connect_warmup: millis("CONNECT_WARMUP_MS", defaults.connect_warmup)?,
            teardown_timeout: millis("TEARDOWN_TIMEOUT_MS", defaults.teardown_timeout)?,
            sink_drain_timeout: millis("SINK_DRAIN_TIMEOUT_MS", defaults.sink_drain_timeout)?,

            transcoder_path: lookup("TRANSCODER_PATH").unwrap_or(defaults.transcoder_path),
            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            pcm_chunk_size: parse_or(&lookup, "PCM_CHUNK_SIZE", defaults.pcm_chunk_size)?,
            sink_buffer_chunks: parse_or(&lookup, "SINK_BUFFER_CHUNKS", defaults.sink_buffer_chunks)?,

            metadata_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "METADATA_CACHE_TTL",
                defaults.metadata_cache_ttl.as_secs(),
            )?),
            metadata_cache_capacity: parse_or(
                &lookup,
                "METADATA_CACHE_CAPACITY",
                defaults.metadata_cache_capacity,
            )?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - PCM chunks must hold whole frames (8 bytes: 2 channels × f32)
    /// - Buffer capacity and timeouts must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.pcm_chunk_size == 0 || self.pcm_chunk_size % FRAME_BYTES != 0 {
            anyhow::bail!(
                "PCM chunk size must be a positive multiple of {} bytes, got: {}",
                FRAME_BYTES,
                self.pcm_chunk_size
            );
        }

        if self.sink_buffer_chunks == 0 {
            anyhow::bail!("Sink buffer must hold at least one chunk");
        }

        if self.teardown_timeout.is_zero() {
            anyhow::bail!("Teardown timeout must be greater than 0");
        }

        if self.sink_drain_timeout.is_zero() {
            anyhow::bail!("Sink drain timeout must be greater than 0");
        }

        if self.metadata_cache_ttl.is_zero() {
            anyhow::bail!("Metadata cache TTL must be greater than 0");
        }

        if self.metadata_cache_capacity == 0 {
            anyhow::bail!("Metadata cache capacity must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Voice: warmup {}, teardown {}, drain {}\n  \
            Audio: {} bytes/chunk, {} chunks buffered\n  \
            Tools: {} / {}\n  \
            Cache: metadata TTL {}, {} entries max",
            self.guild_id
                .map_or("global".to_string(), |id| format!("guild {}", id)),
            humantime::format_duration(self.connect_warmup),
            humantime::format_duration(self.teardown_timeout),
            humantime::format_duration(self.sink_drain_timeout),
            self.pcm_chunk_size,
            self.sink_buffer_chunks,
            self.transcoder_path,
            self.ytdlp_path,
            humantime::format_duration(self.metadata_cache_ttl),
            self.metadata_cache_capacity,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            connect_warmup: Duration::from_millis(500),
            teardown_timeout: Duration::from_secs(5),
            sink_drain_timeout: Duration::from_secs(15),

            transcoder_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),

            pcm_chunk_size: 7680, // 20ms @ 48kHz estéreo f32
            sink_buffer_chunks: 64,

            metadata_cache_ttl: Duration::from_secs(3600),
            metadata_cache_capacity: 1000,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: {}", key, value)),
        _ => Ok(default),
    }
}
