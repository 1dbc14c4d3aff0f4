//! Adaptador de songbird para [`VoiceGateway`], [`VoiceConnection`] y
//! [`AudioSink`].
//!
//! Cada track abre un sink nuevo: un canal acotado de bloques PCM que un
//! `RawAdapter` de songbird consume como f32le 48 kHz estéreo. El canal
//! acotado frena al transcodificador al ritmo de reproducción.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::{Input, RawAdapter},
    tracks::TrackHandle,
    Call, CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
    Songbird, TrackEvent,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use symphonia::core::io::MediaSource;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::audio::{
    connection::{AudioSink, DisconnectWatcher, VoiceConnection, VoiceGateway},
    error::{ConnectFailure, PlaybackError},
    transcoder::{CHANNELS, SAMPLE_RATE},
};

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    buffer_chunks: usize,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, buffer_chunks: usize) -> Self {
        Self {
            manager,
            buffer_chunks,
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        watcher: DisconnectWatcher,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectFailure> {
        let call = match self.manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(e) => {
                // join deja la llamada registrada aunque falle
                if let Err(cleanup) = self.manager.remove(guild_id).await {
                    debug!("Limpieza tras join fallido en guild {}: {}", guild_id, cleanup);
                }
                return Err(match e {
                    JoinError::NoSender => ConnectFailure::GatewayUnavailable,
                    other => ConnectFailure::Transport(other.to_string()),
                });
            }
        };

        {
            let mut handler = call.lock().await;
            handler.add_global_event(
                VoiceEvent::Core(CoreEvent::DriverDisconnect),
                DriverDisconnectHandler { watcher },
            );
        }

        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            call,
            guild_id,
            channel_id,
            buffer_chunks: self.buffer_chunks,
        }))
    }
}

/// Avisa al registro cuando el driver pierde la conexión.
struct DriverDisconnectHandler {
    watcher: DisconnectWatcher,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Driver de voz desconectado en guild {} ({:?}, {:?})",
                self.watcher.guild_id(),
                data.kind,
                data.reason
            );
            self.watcher.notify(format!("driver desconectado: {:?}", data.reason));
        }
        None
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    guild_id: GuildId,
    channel_id: ChannelId,
    buffer_chunks: usize,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let (tx, rx) = flume::bounded(self.buffer_chunks);
        let input: Input = RawAdapter::new(PcmSource::new(rx), SAMPLE_RATE, CHANNELS).into();

        let handle = {
            let mut call = self.call.lock().await;
            if call.current_connection().is_none() {
                return Err(PlaybackError::Streaming(
                    "la llamada no tiene conexión activa".into(),
                ));
            }
            call.play_only_input(input)
        };

        let ended = Arc::new(Notify::new());
        let failed = Arc::new(AtomicBool::new(false));
        for (event, is_error) in [(TrackEvent::End, false), (TrackEvent::Error, true)] {
            handle
                .add_event(
                    VoiceEvent::Track(event),
                    TrackEndHandler {
                        ended: ended.clone(),
                        failed: failed.clone(),
                        is_error,
                    },
                )
                .map_err(|e| PlaybackError::Streaming(e.to_string()))?;
        }

        debug!("🎚️ Sink abierto en guild {}", self.guild_id);

        Ok(Box::new(SongbirdSink {
            tx: Some(tx),
            handle,
            ended,
            failed,
        }))
    }

    async fn is_active(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn close(&self) -> anyhow::Result<()> {
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Llamada de voz cerrada en guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Despierta a `finish` cuando songbird termina (o descarta) el track.
struct TrackEndHandler {
    ended: Arc<Notify>,
    failed: Arc<AtomicBool>,
    is_error: bool,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if self.is_error {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.ended.notify_one();
        None
    }
}

struct SongbirdSink {
    tx: Option<flume::Sender<Bytes>>,
    handle: TrackHandle,
    ended: Arc<Notify>,
    failed: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), PlaybackError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PlaybackError::Streaming("sink ya cerrado".into()))?;

        tx.send_async(chunk)
            .await
            .map_err(|_| PlaybackError::Streaming("songbird descartó el track".into()))
    }

    async fn finish(&mut self) -> Result<(), PlaybackError> {
        // Sin emisor, el lector ve EOF al vaciar el buffer
        self.tx.take();
        self.ended.notified().await;

        if self.failed.load(Ordering::SeqCst) {
            Err(PlaybackError::Transcode(
                "songbird no pudo decodificar el PCM".into(),
            ))
        } else {
            Ok(())
        }
    }

    async fn abort(&mut self) {
        self.tx.take();
        if let Err(e) = self.handle.stop() {
            debug!("El track ya había terminado: {}", e);
        }
    }
}

/// Lector bloqueante sobre el canal de PCM; lo consume el hilo del mixer.
struct PcmSource {
    rx: flume::Receiver<Bytes>,
    current: Bytes,
}

impl PcmSource {
    fn new(rx: flume::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for PcmSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while !self.current.has_remaining() {
            match self.rx.recv() {
                Ok(chunk) => self.current = chunk,
                // Emisor cerrado y canal vacío
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }

        let len = buf.len().min(self.current.remaining());
        self.current.copy_to_slice(&mut buf[..len]);
        Ok(len)
    }
}

impl Seek for PcmSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "el stream PCM no admite seek",
        ))
    }
}

impl MediaSource for PcmSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
