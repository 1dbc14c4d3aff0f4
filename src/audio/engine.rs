//! Worker de reproducción: un consumidor secuencial por guild.
//!
//! Cada worker vacía la cola pendiente de su sesión track por track
//! (resolver → anunciar → transcodificar → stream → limpieza) y termina
//! cuando la cola queda vacía; un `enqueue` posterior arranca otro. Los
//! fallos de un track se aíslan: se reportan y el worker sigue con el
//! siguiente. Solo un fallo de streaming, que implica una conexión muerta,
//! escala a un teardown completo del guild.

use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        connection::{AudioSink, ConnectionRegistry, VoiceConnection},
        error::PlaybackError,
        session::{Enqueued, GuildSession},
        status::{StatusSink, StatusUpdate},
        track::Track,
        transcoder::{TranscodeProcess, TranscoderConfig},
    },
    sources::TrackResolver,
};

pub struct PlaybackEngine {
    resolver: Arc<dyn TrackResolver>,
    transcoder: TranscoderConfig,
    connections: Arc<ConnectionRegistry>,
    drain_timeout: Duration,
}

impl PlaybackEngine {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        transcoder: TranscoderConfig,
        connections: Arc<ConnectionRegistry>,
        drain_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            transcoder,
            connections,
            drain_timeout,
        })
    }

    /// Encola un track y arranca el worker si la sesión estaba inactiva.
    ///
    /// `None` si la sesión ya se cerró: el track no se encoló.
    pub fn enqueue(
        self: &Arc<Self>,
        session: &Arc<GuildSession>,
        track: Track,
        status_sink: Arc<dyn StatusSink>,
    ) -> Option<Enqueued> {
        let title = track.title().to_string();
        let enqueued = session.enqueue(track, status_sink)?;
        info!(
            "➕ Agregado #{} a la cola de guild {}: {}",
            enqueued.sequence,
            session.guild_id(),
            title
        );

        if enqueued.start_worker {
            self.spawn_worker(session.clone());
        }
        Some(enqueued)
    }

    fn spawn_worker(self: &Arc<Self>, session: Arc<GuildSession>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(session).await })
    }

    async fn run(self: Arc<Self>, session: Arc<GuildSession>) {
        let guild_id = session.guild_id();
        info!("▶️ Worker de reproducción iniciado en guild {}", guild_id);

        loop {
            let Some(track) = session.next_track() else {
                if session.release_worker() {
                    break;
                }
                continue;
            };

            session.take_display_entry(track.source_id());

            match self.play_track(&session, &track).await {
                Ok(()) => debug!("✅ Track terminado en guild {}: {}", guild_id, track.title()),
                Err(PlaybackError::Cancelled) => {
                    info!("⏹️ Reproducción cancelada en guild {}: {}", guild_id, track.title());
                }
                Err(e) if e.is_connection_fatal() => {
                    error!(
                        "🔌 Conexión perdida en guild {} durante {}: {}",
                        guild_id,
                        track.title(),
                        e
                    );
                    self.report_failure(&session, &track, &e).await;
                    self.escalate(&session, &e);
                }
                Err(e) => {
                    warn!("⏭️ Saltando {} en guild {}: {}", track.title(), guild_id, e);
                    self.report_failure(&session, &track, &e).await;
                }
            }
        }

        info!("📭 Cola vacía, worker finalizado en guild {}", guild_id);
    }

    async fn play_track(&self, session: &GuildSession, track: &Track) -> Result<(), PlaybackError> {
        let guild_id = session.guild_id();

        let stream_url = tokio::select! {
            biased;
            _ = session.closed() => return Err(PlaybackError::Cancelled),
            resolved = self.resolver.resolve_stream_url(track.source_id()) => resolved?,
        };
        debug!("🔗 Stream resuelto para {} en guild {}", track.title(), guild_id);

        let connection = self.live_connection(session)?;

        self.announce(session, StatusUpdate::NowPlaying(track.clone()))
            .await;

        let mut process = self.transcoder.spawn(&stream_url)?;
        let mut sink = match connection.open_sink().await {
            Ok(sink) => sink,
            Err(e) => {
                process.finish(true).await;
                return Err(e);
            }
        };
        // La conexión sigue siendo del registro; el sink basta para el track
        drop(connection);

        info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title());

        let streamed = match self.stream(session, &mut process, sink.as_mut()).await {
            Ok(bytes) => {
                debug!("{} bytes de PCM enviados en guild {}", bytes, guild_id);
                self.drain(session, sink.as_mut()).await
            }
            Err(e) => {
                sink.abort().await;
                Err(e)
            }
        };

        let report = process.finish(streamed.is_err()).await;
        if let Some(diagnostics) = report.diagnostics() {
            warn!(
                "🎛️ Diagnóstico del transcodificador en guild {} ({}): {}",
                guild_id,
                track.title(),
                diagnostics
            );
        }

        streamed.and(report.into_result())
    }

    /// Conexión de la sesión. Si la referencia quedó obsoleta por una
    /// reconexión, se renueva con la vigente del registro.
    fn live_connection(&self, session: &GuildSession) -> Result<Arc<dyn VoiceConnection>, PlaybackError> {
        if let Some(connection) = session.connection().and_then(|reference| reference.upgrade()) {
            return Ok(connection);
        }

        let no_connection = || PlaybackError::Streaming("no hay conexión de voz activa".into());
        let reference = self
            .connections
            .reference(session.guild_id())
            .ok_or_else(no_connection)?;
        let connection = reference.upgrade().ok_or_else(no_connection)?;

        debug!(
            "🔄 Conexión renovada en guild {} (generación {})",
            session.guild_id(),
            reference.generation()
        );
        session.bind_connection(reference);
        Ok(connection)
    }

    /// Copia el stdout del transcodificador al sink hasta EOF.
    async fn stream(
        &self,
        session: &GuildSession,
        process: &mut TranscodeProcess,
        sink: &mut dyn AudioSink,
    ) -> Result<usize, PlaybackError> {
        let mut total = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = session.closed() => return Err(PlaybackError::Cancelled),
                chunk = process.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Ok(total);
            };
            total += chunk.len();

            tokio::select! {
                biased;
                _ = session.closed() => return Err(PlaybackError::Cancelled),
                written = sink.write(chunk) => written?,
            }
        }
    }

    /// Espera a que suene el audio en buffer, sin pasar del límite configurado.
    async fn drain(&self, session: &GuildSession, sink: &mut dyn AudioSink) -> Result<(), PlaybackError> {
        let finished = tokio::select! {
            biased;
            _ = session.closed() => None,
            finished = tokio::time::timeout(self.drain_timeout, sink.finish()) => Some(finished),
        };

        match finished {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                warn!(
                    "⏰ El sink de guild {} no terminó en {}, se corta",
                    session.guild_id(),
                    humantime::format_duration(self.drain_timeout)
                );
                sink.abort().await;
                Ok(())
            }
            None => {
                sink.abort().await;
                Err(PlaybackError::Cancelled)
            }
        }
    }

    async fn announce(&self, session: &GuildSession, update: StatusUpdate) {
        let Some(status_sink) = session.status_sink() else {
            return;
        };
        if let Err(e) = status_sink.post(update).await {
            warn!("⚠️ No se pudo publicar estado en guild {}: {:?}", session.guild_id(), e);
        }
    }

    async fn report_failure(&self, session: &GuildSession, track: &Track, error: &PlaybackError) {
        self.announce(
            session,
            StatusUpdate::TrackFailed {
                track: track.clone(),
                reason: error.to_string(),
            },
        )
        .await;
    }

    /// Cierra la cola ya mismo y pide al registro un teardown completo.
    ///
    /// El teardown corre en otra tarea: espera a que este worker salga.
    fn escalate(&self, session: &GuildSession, error: &PlaybackError) {
        let guild_id = session.guild_id();
        let generation = session.connection().map(|reference| reference.generation());
        session.close();

        let connections = self.connections.clone();
        let reason = error.to_string();
        tokio::spawn(async move {
            connections.retire(guild_id, generation, &reason).await;
        });
    }
}
