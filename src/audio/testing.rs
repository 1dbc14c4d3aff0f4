//! Dobles de prueba para la capa de voz: un gateway en memoria cuyas
//! conexiones registran lo que se reproduce, y un destino de estado que
//! guarda cada actualización.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::audio::{
    connection::{AudioSink, DisconnectWatcher, VoiceConnection, VoiceGateway},
    error::{ConnectFailure, PlaybackError},
    status::{StatusSink, StatusUpdate},
};

pub fn guild(id: u64) -> GuildId {
    GuildId::new(id)
}

pub fn channel(id: u64) -> ChannelId {
    ChannelId::new(id)
}

#[derive(Default)]
struct GatewayLog {
    opened: usize,
    closed: usize,
    watchers: HashMap<GuildId, DisconnectWatcher>,
    inactive: HashSet<GuildId>,
    failing_writes: HashSet<GuildId>,
    played: HashMap<GuildId, Vec<String>>,
    aborted: HashMap<GuildId, usize>,
    open_sinks: HashMap<GuildId, usize>,
    max_sinks: HashMap<GuildId, usize>,
}

/// Gateway en memoria. No guarda las conexiones, solo su registro compartido.
pub struct FakeGateway {
    failure: Option<String>,
    log: Arc<Mutex<GatewayLog>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            failure: None,
            log: Arc::default(),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(message.to_string()),
            log: Arc::default(),
        })
    }

    /// Conexiones abiertas que aún no se cerraron.
    pub fn open_count(&self) -> usize {
        let log = self.log.lock();
        log.opened - log.closed
    }

    pub fn closed_count(&self) -> usize {
        self.log.lock().closed
    }

    /// Simula una caída del transporte sin pasar por el registro.
    pub fn drop_connection(&self, guild_id: GuildId) {
        let watcher = {
            let mut log = self.log.lock();
            log.inactive.insert(guild_id);
            log.watchers.remove(&guild_id)
        };
        if let Some(watcher) = watcher {
            watcher.notify("caída simulada");
        }
    }

    /// El transporte sigue registrado pero ya no transmite.
    pub fn mark_inactive(&self, guild_id: GuildId) {
        self.log.lock().inactive.insert(guild_id);
    }

    pub fn fail_writes(&self, guild_id: GuildId) {
        self.log.lock().failing_writes.insert(guild_id);
    }

    /// Contenido de cada track que terminó de sonar, en orden.
    pub fn played(&self, guild_id: GuildId) -> Vec<String> {
        self.log.lock().played.get(&guild_id).cloned().unwrap_or_default()
    }

    pub fn aborted(&self, guild_id: GuildId) -> usize {
        self.log.lock().aborted.get(&guild_id).copied().unwrap_or_default()
    }

    pub fn max_concurrent_sinks(&self, guild_id: GuildId) -> usize {
        self.log.lock().max_sinks.get(&guild_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        watcher: DisconnectWatcher,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectFailure> {
        if let Some(message) = &self.failure {
            return Err(ConnectFailure::Transport(message.clone()));
        }

        let mut log = self.log.lock();
        log.opened += 1;
        log.inactive.remove(&guild_id);
        log.watchers.insert(guild_id, watcher);

        Ok(Arc::new(FakeConnection {
            guild_id,
            channel_id,
            log: self.log.clone(),
        }))
    }
}

struct FakeConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    log: Arc<Mutex<GatewayLog>>,
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let mut log = self.log.lock();
        let open = log.open_sinks.entry(self.guild_id).or_default();
        *open += 1;
        let open = *open;
        let max = log.max_sinks.entry(self.guild_id).or_default();
        *max = (*max).max(open);

        Ok(Box::new(FakeSink {
            guild_id: self.guild_id,
            log: self.log.clone(),
            chunks: Vec::new(),
        }))
    }

    async fn is_active(&self) -> bool {
        !self.log.lock().inactive.contains(&self.guild_id)
    }

    async fn close(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.closed += 1;
        log.inactive.insert(self.guild_id);
        Ok(())
    }
}

struct FakeSink {
    guild_id: GuildId,
    log: Arc<Mutex<GatewayLog>>,
    chunks: Vec<Bytes>,
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), PlaybackError> {
        if self.log.lock().failing_writes.contains(&self.guild_id) {
            return Err(PlaybackError::Streaming("el transporte rechazó el audio".into()));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), PlaybackError> {
        let content = self.chunks.concat();
        if !content.is_empty() {
            self.log
                .lock()
                .played
                .entry(self.guild_id)
                .or_default()
                .push(String::from_utf8_lossy(&content).into_owned());
        }
        Ok(())
    }

    async fn abort(&mut self) {
        *self.log.lock().aborted.entry(self.guild_id).or_default() += 1;
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        if let Some(open) = self.log.lock().open_sinks.get_mut(&self.guild_id) {
            *open = open.saturating_sub(1);
        }
    }
}

/// Guarda cada actualización publicada.
#[derive(Default)]
pub struct RecordingStatus {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatus {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn now_playing(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .filter_map(|update| match update {
                StatusUpdate::NowPlaying(track) => Some(track.title().to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .filter_map(|update| match update {
                StatusUpdate::TrackFailed { track, .. } => Some(track.title().to_string()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn post(&self, update: StatusUpdate) -> Result<()> {
        self.updates.lock().push(update);
        Ok(())
    }
}
