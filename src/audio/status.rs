use anyhow::Result;
use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;

use crate::{audio::track::Track, ui::embeds};

/// Mensajes de estado que el worker publica durante la reproducción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    NowPlaying(Track),
    TrackFailed { track: Track, reason: String },
}

/// Destino de los mensajes de estado de una sesión (normalmente el canal de
/// texto desde donde se ejecutó el último comando).
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn post(&self, update: StatusUpdate) -> Result<()>;
}

/// Publica actualizaciones como embeds en un canal de texto de Discord.
pub struct ChannelStatusSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelStatusSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl StatusSink for ChannelStatusSink {
    async fn post(&self, update: StatusUpdate) -> Result<()> {
        let embed = match &update {
            StatusUpdate::NowPlaying(track) => embeds::create_now_playing_embed(track),
            StatusUpdate::TrackFailed { track, reason } => {
                embeds::create_track_failed_embed(track, reason)
            }
        };

        self.channel_id
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await?;

        Ok(())
    }
}
