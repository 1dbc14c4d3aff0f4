use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, TrackResolver};
use crate::audio::{error::ResolutionFailure, track::Track};

/// Resolvedor basado en el ejecutable `yt-dlp`.
pub struct YtDlpResolver {
    program: String,
    // Limitar requests concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Las URLs se pasan tal cual; el texto libre se busca en YouTube.
    fn search_target(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    /// Primer resultado de la salida `--dump-json` (un objeto por línea).
    fn parse_track(stdout: &str) -> Option<Track> {
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .map(Self::info_to_track)
    }

    fn info_to_track(info: YtDlpInfo) -> Track {
        let mut track = Track::new(info.title, info.id);

        if let Some(duration) = info.duration.filter(|d| d.is_finite() && *d >= 0.0) {
            track = track.with_duration(Duration::from_secs_f64(duration));
        }

        if let Some(thumbnail) = info.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        track
    }

    fn watch_url(source_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", source_id)
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ResolutionFailure> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolutionFailure::Backend(e.to_string()))?;

        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                ResolutionFailure::Backend(format!("no se pudo ejecutar {}: {}", self.program, e))
            })
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, ResolutionFailure> {
        let target = Self::search_target(query);
        info!("🔍 Buscando en YouTube: {}", query);

        let output = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                &target,
            ])
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("yt-dlp error para {}: {}", query, error);
            return Err(ResolutionFailure::Backend(error));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = Self::parse_track(&stdout)
            .ok_or_else(|| ResolutionFailure::NotFound(query.to_string()))?;

        debug!("📊 Resuelto {} → {}", query, track.source_id());
        Ok(track)
    }

    async fn resolve_stream_url(&self, source_id: &str) -> Result<String, ResolutionFailure> {
        debug!("🎵 Obteniendo URL de stream para: {}", source_id);

        let url = Self::watch_url(source_id);
        let output = self
            .run(&[
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--get-url",
                "--no-warnings",
                &url,
            ])
            .await?;

        if !output.status.success() {
            return Err(ResolutionFailure::Unavailable {
                id: source_id.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolutionFailure::Unavailable {
                id: source_id.to_string(),
                reason: "yt-dlp no devolvió URL de stream".into(),
            })
    }
}
