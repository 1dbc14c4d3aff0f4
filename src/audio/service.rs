//! Fachada que usan los comandos: une el registro de conexiones, las
//! sesiones, el resolvedor y el motor de reproducción.
//!
//! Devuelve resultados tipados; el texto para el usuario lo arma `bot`.

use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        connection::{ConnectionRef, ConnectionRegistry},
        engine::PlaybackEngine,
        error::{ConnectFailure, ResolutionFailure},
        status::StatusSink,
        track::{QueueSnapshot, Track},
    },
    sources::TrackResolver,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Queued { track: Track, snapshot: QueueSnapshot },
    NotInVoice,
    ConnectFailed(ConnectFailure),
    NotFound(ResolutionFailure),
    /// Un leave/join concurrente cerró la sesión una y otra vez.
    Interrupted,
}

/// Intentos de encolar cuando la sesión se cierra bajo nuestros pies.
const ENQUEUE_ATTEMPTS: usize = 3;

pub struct VoiceService {
    connections: Arc<ConnectionRegistry>,
    engine: Arc<PlaybackEngine>,
    resolver: Arc<dyn TrackResolver>,
    warmup: Duration,
}

impl VoiceService {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        engine: Arc<PlaybackEngine>,
        resolver: Arc<dyn TrackResolver>,
        warmup: Duration,
    ) -> Self {
        Self {
            connections,
            engine,
            resolver,
            warmup,
        }
    }

    #[cfg(test)]
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Conecta (o mueve) el bot al canal indicado.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ChannelId, ConnectFailure> {
        let reference = self.connections.connect(guild_id, channel_id).await?;
        // connect() descarta la sesión previa, pero un play concurrente pudo crear otra
        if let Some(session) = self.connections.sessions().get(guild_id) {
            session.bind_connection(reference.clone());
        }
        Ok(reference.channel_id())
    }

    pub async fn leave(&self, guild_id: GuildId) -> LeaveOutcome {
        if self.connections.disconnect(guild_id).await {
            LeaveOutcome::Left
        } else {
            debug!("Leave en guild {} sin conexión activa", guild_id);
            LeaveOutcome::NotConnected
        }
    }

    /// Conecta si hace falta, resuelve la consulta y encola el resultado.
    pub async fn play(
        &self,
        guild_id: GuildId,
        user_channel: Option<ChannelId>,
        query: &str,
        status_sink: Arc<dyn StatusSink>,
    ) -> PlayOutcome {
        let Some(channel_id) = user_channel else {
            return PlayOutcome::NotInVoice;
        };

        if let Err(e) = self.ensure_connected(guild_id, channel_id).await {
            return PlayOutcome::ConnectFailed(e);
        }

        let track = match self.resolver.resolve(query).await {
            Ok(track) => track,
            Err(e) => {
                warn!("🔍 Sin resultados para '{}' en guild {}: {}", query, guild_id, e);
                return PlayOutcome::NotFound(e);
            }
        };

        for _ in 0..ENQUEUE_ATTEMPTS {
            // Mientras se resolvía, un join pudo reemplazar la conexión o un leave quitarla
            let reference = match self.connections.reference(guild_id) {
                Some(reference) => reference,
                None => match self.ensure_connected(guild_id, channel_id).await {
                    Ok(reference) => reference,
                    Err(e) => return PlayOutcome::ConnectFailed(e),
                },
            };

            let session = self.connections.sessions().get_or_create(guild_id);
            session.bind_connection(reference);
            if let Some(enqueued) = self.engine.enqueue(&session, track.clone(), status_sink.clone()) {
                return PlayOutcome::Queued {
                    track,
                    snapshot: enqueued.snapshot,
                };
            }
            debug!("Sesión de guild {} cerrada durante play, se reintenta", guild_id);
        }

        warn!("⚠️ No se pudo encolar {} en guild {}: la sesión se cerró", track.title(), guild_id);
        PlayOutcome::Interrupted
    }

    /// Cola visible del guild. No crea sesión si no existe.
    pub fn queue(&self, guild_id: GuildId) -> QueueSnapshot {
        self.connections
            .sessions()
            .get(guild_id)
            .map(|session| session.snapshot())
            .unwrap_or_default()
    }

    /// El gateway informó que el bot salió del canal de voz.
    pub async fn handle_voice_left(&self, guild_id: GuildId) {
        let Some(connection) = self.connections.get(guild_id) else {
            return;
        };
        if connection.is_active().await {
            debug!("Guild {} sigue con transporte activo, se ignora", guild_id);
            return;
        }

        info!("🚪 El bot salió del canal de voz en guild {}", guild_id);
        self.connections.disconnect(guild_id).await;
    }

    /// Cierra todas las conexiones vivas.
    pub async fn shutdown(&self) {
        let guilds = self.connections.connected_guilds();
        info!("🛑 Cerrando {} conexiones de voz", guilds.len());

        futures::future::join_all(
            guilds
                .into_iter()
                .map(|guild_id| self.connections.disconnect(guild_id)),
        )
        .await;
    }

    /// Reutiliza la conexión viva o abre una nueva y espera el calentamiento.
    pub async fn ensure_connected(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionRef, ConnectFailure> {
        if let (Some(connection), Some(reference)) = (
            self.connections.get(guild_id),
            self.connections.reference(guild_id),
        ) {
            if connection.is_active().await {
                return Ok(reference);
            }
        }

        let reference = self.connections.connect(guild_id, channel_id).await?;
        if !self.warmup.is_zero() {
            tokio::time::sleep(self.warmup).await;
        }
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            session::SessionRegistry,
            testing::{channel, guild, FakeGateway, RecordingStatus},
            transcoder::TranscoderConfig,
        },
        sources::MockTrackResolver,
    };
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    fn resolver() -> MockTrackResolver {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve().returning(|query| match query {
            "a" => Ok(Track::new("A", "a").with_duration(Duration::from_secs(120))),
            "b" => Ok(Track::new("B", "b").with_duration(Duration::from_secs(210))),
            other => Err(ResolutionFailure::NotFound(other.to_string())),
        });
        resolver
            .expect_resolve_stream_url()
            .returning(|id| Ok(format!("stream-{id}")));
        resolver
    }

    /// Retiene la resolución de "a" hasta que el test abra la compuerta.
    struct GatedResolver {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl TrackResolver for GatedResolver {
        async fn resolve(&self, query: &str) -> Result<Track, ResolutionFailure> {
            if query == "a" {
                self.gate.notified().await;
            }
            Ok(Track::new(query.to_uppercase(), query).with_duration(Duration::from_secs(60)))
        }

        async fn resolve_stream_url(&self, source_id: &str) -> Result<String, ResolutionFailure> {
            Ok(format!("stream-{source_id}"))
        }
    }

    fn service(gateway: Arc<FakeGateway>) -> VoiceService {
        service_with(gateway, Arc::new(resolver()))
    }

    fn service_with(gateway: Arc<FakeGateway>, resolver: Arc<dyn TrackResolver>) -> VoiceService {
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(5)));
        let connections = ConnectionRegistry::new(gateway, sessions);
        let transcoder = TranscoderConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "printf '%s' \"$1\"".into(), "sh".into(), "{input}".into()],
            chunk_size: 64,
        };
        let engine = PlaybackEngine::new(
            resolver.clone(),
            transcoder,
            connections.clone(),
            Duration::from_secs(2),
        );

        VoiceService::new(connections, engine, resolver, Duration::ZERO)
    }

    #[tokio::test]
    async fn two_tracks_on_fresh_guild_queue_and_play_in_order() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());
        let status = RecordingStatus::new();

        service
            .play(guild(1), Some(channel(10)), "a", status.clone())
            .await;
        let outcome = service
            .play(guild(1), Some(channel(10)), "b", status.clone())
            .await;

        let PlayOutcome::Queued { track, snapshot } = outcome else {
            panic!("se esperaba Queued, llegó {:?}", outcome);
        };
        assert_eq!(track.title(), "B");
        assert_eq!(snapshot.titles(), vec!["A", "B"]);
        assert_eq!(snapshot.total_duration, Duration::from_secs(330));
        assert_eq!(gateway.open_count(), 1);

        let session = service.connections().sessions().get(guild(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(10), session.wait_idle())
            .await
            .unwrap();

        assert_eq!(gateway.played(guild(1)), vec!["stream-a", "stream-b"]);
        assert!(service.queue(guild(1)).is_empty());
    }

    #[tokio::test]
    async fn play_without_voice_channel_changes_nothing() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());

        let outcome = service.play(guild(1), None, "a", RecordingStatus::new()).await;

        assert_eq!(outcome, PlayOutcome::NotInVoice);
        assert_eq!(gateway.open_count(), 0);
        assert!(service.connections().sessions().get(guild(1)).is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_reported_without_session() {
        let service = service(FakeGateway::failing("sin permisos"));

        let outcome = service
            .play(guild(1), Some(channel(10)), "a", RecordingStatus::new())
            .await;

        assert_eq!(
            outcome,
            PlayOutcome::ConnectFailed(ConnectFailure::Transport("sin permisos".into()))
        );
        assert!(service.connections().sessions().get(guild(1)).is_none());
    }

    #[tokio::test]
    async fn unknown_query_is_not_found() {
        let service = service(FakeGateway::new());

        let outcome = service
            .play(guild(1), Some(channel(10)), "zzz", RecordingStatus::new())
            .await;

        assert_eq!(
            outcome,
            PlayOutcome::NotFound(ResolutionFailure::NotFound("zzz".into()))
        );
        assert!(service.queue(guild(1)).is_empty());
    }

    #[tokio::test]
    async fn leave_without_connection_is_not_connected() {
        let service = service(FakeGateway::new());

        assert_eq!(service.leave(guild(1)).await, LeaveOutcome::NotConnected);
        assert!(service.connections().sessions().get(guild(1)).is_none());
    }

    #[tokio::test]
    async fn queue_does_not_create_sessions() {
        let service = service(FakeGateway::new());

        assert!(service.queue(guild(7)).is_empty());
        assert_eq!(service.connections().sessions().len(), 0);
    }

    #[tokio::test]
    async fn ensure_connected_reuses_active_connection() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());

        let first = service.ensure_connected(guild(1), channel(10)).await.unwrap();
        let second = service.ensure_connected(guild(1), channel(11)).await.unwrap();

        assert_eq!(first.generation(), second.generation());
        assert_eq!(gateway.closed_count(), 0);
    }

    #[tokio::test]
    async fn ensure_connected_replaces_dead_transport() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());

        let first = service.ensure_connected(guild(1), channel(10)).await.unwrap();
        gateway.mark_inactive(guild(1));
        let second = service.ensure_connected(guild(1), channel(10)).await.unwrap();

        assert!(second.generation() > first.generation());
        assert_eq!(gateway.closed_count(), 1);
    }

    #[tokio::test]
    async fn voice_left_tears_down_only_dead_connections() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());
        service.join(guild(1), channel(10)).await.unwrap();

        service.handle_voice_left(guild(1)).await;
        assert!(service.connections().is_connected(guild(1)));

        gateway.mark_inactive(guild(1));
        service.handle_voice_left(guild(1)).await;
        assert!(!service.connections().is_connected(guild(1)));
    }

    #[tokio::test]
    async fn shutdown_disconnects_every_guild() {
        let gateway = FakeGateway::new();
        let service = service(gateway.clone());
        service.join(guild(1), channel(10)).await.unwrap();
        service.join(guild(2), channel(20)).await.unwrap();

        service.shutdown().await;

        assert!(service.connections().connected_guilds().is_empty());
        assert_eq!(gateway.open_count(), 0);
    }

    async fn gated_play(
        service: &Arc<VoiceService>,
        status: &Arc<RecordingStatus>,
    ) -> tokio::task::JoinHandle<PlayOutcome> {
        let pending = tokio::spawn({
            let service = service.clone();
            let status = status.clone();
            async move { service.play(guild(1), Some(channel(10)), "a", status).await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !service.connections().is_connected(guild(1)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("play debe conectar antes de resolver");
        pending
    }

    async fn wait_for_worker(service: &VoiceService) {
        let session = service.connections().sessions().get(guild(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(10), session.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn play_racing_join_uses_the_new_connection() {
        let gateway = FakeGateway::new();
        let gate = Arc::new(Notify::new());
        let service = Arc::new(service_with(
            gateway.clone(),
            Arc::new(GatedResolver { gate: gate.clone() }),
        ));
        let status = RecordingStatus::new();

        let pending = gated_play(&service, &status).await;
        service.join(guild(1), channel(11)).await.unwrap();
        gate.notify_one();

        assert!(matches!(pending.await.unwrap(), PlayOutcome::Queued { .. }));
        wait_for_worker(&service).await;
        assert_eq!(gateway.played(guild(1)), vec!["stream-a"]);
        assert!(status.failed().is_empty());

        let outcome = service
            .play(guild(1), Some(channel(11)), "b", status.clone())
            .await;
        assert!(matches!(outcome, PlayOutcome::Queued { .. }));
        wait_for_worker(&service).await;

        assert_eq!(gateway.played(guild(1)), vec!["stream-a", "stream-b"]);
        assert!(service.queue(guild(1)).is_empty());
        assert_eq!(gateway.open_count(), 1);
    }

    #[tokio::test]
    async fn play_racing_leave_reconnects_instead_of_failing() {
        let gateway = FakeGateway::new();
        let gate = Arc::new(Notify::new());
        let service = Arc::new(service_with(
            gateway.clone(),
            Arc::new(GatedResolver { gate: gate.clone() }),
        ));
        let status = RecordingStatus::new();

        let pending = gated_play(&service, &status).await;
        assert_eq!(service.leave(guild(1)).await, LeaveOutcome::Left);
        gate.notify_one();

        assert!(matches!(pending.await.unwrap(), PlayOutcome::Queued { .. }));
        wait_for_worker(&service).await;

        assert_eq!(gateway.played(guild(1)), vec!["stream-a"]);
        assert!(status.failed().is_empty());
        assert!(service.connections().is_connected(guild(1)));
    }
}
