use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::audio::{
    connection::ConnectionRef,
    status::StatusSink,
    track::{QueueSnapshot, Track},
};

/// Estado mutable por guild: cola pendiente, cola visible, bandera de
/// reproducción, destino de estado y referencia a la conexión activa.
pub struct GuildSession {
    guild_id: GuildId,
    // Muchos productores (enqueue), un único lector (el worker)
    pending_tx: flume::Sender<Track>,
    pending_rx: flume::Receiver<Track>,
    state: Mutex<SessionState>,
    playing: watch::Sender<bool>,
    closed: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    display: Vec<Track>,
    status_sink: Option<Arc<dyn StatusSink>>,
    connection: Option<ConnectionRef>,
    enqueued: u64,
}

/// Resultado de encolar: la proyección para el llamador, el número de orden
/// del track dentro de la sesión y si le toca arrancar el worker.
pub struct Enqueued {
    pub snapshot: QueueSnapshot,
    pub sequence: u64,
    pub start_worker: bool,
}

impl GuildSession {
    pub fn new(guild_id: GuildId) -> Self {
        let (pending_tx, pending_rx) = flume::unbounded();
        let (playing, _) = watch::channel(false);

        Self {
            guild_id,
            pending_tx,
            pending_rx,
            state: Mutex::new(SessionState::default()),
            playing,
            closed: CancellationToken::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Agrega un track a ambas colas de forma atómica y decide, sin carreras,
    /// si el llamador debe arrancar el worker.
    ///
    /// `None` si la sesión ya está cerrada; en ese caso no se toca nada.
    pub fn enqueue(&self, track: Track, status_sink: Arc<dyn StatusSink>) -> Option<Enqueued> {
        let (snapshot, sequence) = {
            let mut state = self.state.lock();
            // close() cancela bajo este mismo lock
            if self.is_closed() {
                debug!("Sesión de guild {} cerrada, se rechaza {}", self.guild_id, track.title());
                return None;
            }
            state.status_sink = Some(status_sink);

            // Canal sin límite y con receptor propio: el envío no puede fallar
            let _ = self.pending_tx.send(track.clone());
            state.display.push(track);
            state.enqueued += 1;

            (QueueSnapshot::from_tracks(&state.display), state.enqueued)
        };

        Some(Enqueued {
            snapshot,
            sequence,
            start_worker: self.claim_worker(),
        })
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot::from_tracks(&state.display)
    }

    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending_rx.len()
    }

    pub fn bind_connection(&self, connection: ConnectionRef) {
        self.state.lock().connection = Some(connection);
    }

    pub fn connection(&self) -> Option<ConnectionRef> {
        self.state.lock().connection.clone()
    }

    /// Destino de estado actual; `None` una vez cerrada la sesión.
    pub fn status_sink(&self) -> Option<Arc<dyn StatusSink>> {
        if self.is_closed() {
            return None;
        }
        self.state.lock().status_sink.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Cierra la cola: despierta al worker para que salga y descarta lo pendiente.
    pub fn close(&self) {
        let mut state = self.state.lock();
        self.closed.cancel();

        let dropped = self.pending_rx.drain().count();
        state.display.clear();
        state.status_sink = None;

        if dropped > 0 {
            debug!("🗑️ {} tracks descartados al cerrar guild {}", dropped, self.guild_id);
        }
    }

    /// Espera a que no quede ningún worker activo.
    pub async fn wait_idle(&self) {
        let mut playing = self.playing.subscribe();
        let _ = playing.wait_for(|playing| !*playing).await;
    }

    // Lado del worker

    pub(crate) fn next_track(&self) -> Option<Track> {
        if self.is_closed() {
            return None;
        }
        self.pending_rx.try_recv().ok()
    }

    /// Quita de la cola visible la primera entrada con ese `source_id`.
    pub(crate) fn take_display_entry(&self, source_id: &str) -> bool {
        let mut state = self.state.lock();
        match state
            .display
            .iter()
            .position(|track| track.source_id() == source_id)
        {
            Some(index) => {
                state.display.remove(index);
                true
            }
            None => false,
        }
    }

    /// Libera la bandera de reproducción si la cola está vacía (o cerrada).
    /// Devuelve `false` si llegó trabajo nuevo y el worker debe seguir.
    pub(crate) fn release_worker(&self) -> bool {
        let mut released = false;
        self.playing.send_if_modified(|playing| {
            if self.pending_rx.is_empty() || self.closed.is_cancelled() {
                *playing = false;
                released = true;
                true
            } else {
                false
            }
        });
        released
    }

    fn claim_worker(&self) -> bool {
        self.playing.send_if_modified(|playing| {
            if *playing {
                false
            } else {
                *playing = true;
                true
            }
        })
    }
}

/// Mapa guild → sesión, con creación atómica bajo demanda.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    teardown_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(teardown_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            teardown_timeout,
        }
    }

    /// Sesión viva del guild; una cerrada que quedó en el mapa se reemplaza.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSession> {
        let mut entry = self.sessions.entry(guild_id).or_insert_with(|| {
            debug!("Nueva sesión para guild {}", guild_id);
            Arc::new(GuildSession::new(guild_id))
        });
        if entry.is_closed() {
            debug!("Sesión cerrada de guild {} reemplazada", guild_id);
            *entry = Arc::new(GuildSession::new(guild_id));
        }
        entry.clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|session| session.clone())
    }

    /// Quita la sesión, cierra su cola y espera a que el worker termine.
    pub async fn teardown(&self, guild_id: GuildId) -> bool {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return false;
        };

        session.close();

        if tokio::time::timeout(self.teardown_timeout, session.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "⏰ El worker de guild {} no terminó en {}",
                guild_id,
                humantime::format_duration(self.teardown_timeout)
            );
        } else {
            info!("🧹 Sesión de guild {} descartada", guild_id);
        }

        true
    }

    /// Quita la sesión del guild solo si ya está cerrada.
    pub fn discard_closed(&self, guild_id: GuildId) -> bool {
        let discarded = self
            .sessions
            .remove_if(&guild_id, |_, session| session.is_closed())
            .is_some();
        if discarded {
            info!("🧹 Sesión cerrada de guild {} descartada", guild_id);
        }
        discarded
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{guild, RecordingStatus};
    use pretty_assertions::assert_eq;

    fn track(id: &str) -> Track {
        Track::new(id.to_uppercase(), id).with_duration(Duration::from_secs(60))
    }

    #[test]
    fn only_first_enqueue_on_idle_session_starts_worker() {
        let session = GuildSession::new(guild(1));
        let sink = RecordingStatus::new();

        let first = session.enqueue(track("a"), sink.clone()).unwrap();
        let second = session.enqueue(track("b"), sink.clone()).unwrap();

        assert!(first.start_worker);
        assert!(!second.start_worker);
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(second.snapshot.titles(), vec!["A", "B"]);
        assert_eq!(second.snapshot.total_duration, Duration::from_secs(120));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_claim_exactly_one_worker() {
        let session = Arc::new(GuildSession::new(guild(1)));
        let sink = RecordingStatus::new();

        let tasks = (0..32).map(|i| {
            let session = session.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                session
                    .enqueue(track(&format!("t{i}")), sink)
                    .map_or(false, |enqueued| enqueued.start_worker)
            })
        });
        let started = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|started| *started.as_ref().unwrap())
            .count();

        assert_eq!(started, 1);
        assert_eq!(session.pending_len(), 32);
        assert_eq!(session.snapshot().len(), 32);
    }

    #[test]
    fn release_keeps_worker_while_work_is_pending() {
        let session = GuildSession::new(guild(1));
        let sink = RecordingStatus::new();
        session.enqueue(track("a"), sink);

        assert!(!session.release_worker());
        assert!(session.is_playing());

        session.next_track();
        assert!(session.release_worker());
        assert!(!session.is_playing());
    }

    #[test]
    fn display_removal_matches_first_source_id_only() {
        let session = GuildSession::new(guild(1));
        let sink = RecordingStatus::new();
        session.enqueue(track("a"), sink.clone());
        session.enqueue(track("b"), sink.clone());
        session.enqueue(track("a"), sink);

        assert!(session.take_display_entry("a"));
        assert_eq!(session.snapshot().titles(), vec!["B", "A"]);
        assert!(!session.take_display_entry("zzz"));
    }

    #[test]
    fn close_drops_pending_work_and_sink() {
        let session = GuildSession::new(guild(1));
        session.enqueue(track("a"), RecordingStatus::new());

        session.close();

        assert!(session.next_track().is_none());
        assert!(session.snapshot().is_empty());
        assert!(session.status_sink().is_none());
        assert!(session.release_worker());
    }

    #[test]
    fn enqueue_after_close_is_rejected_untouched() {
        let session = GuildSession::new(guild(1));
        session.close();

        let enqueued = session.enqueue(track("a"), RecordingStatus::new());

        assert!(enqueued.is_none());
        assert!(session.snapshot().is_empty());
        assert_eq!(session.pending_len(), 0);
        assert!(!session.is_playing());
    }

    #[test]
    fn get_or_create_replaces_closed_session() {
        let registry = SessionRegistry::new(Duration::from_secs(1));
        let closed = registry.get_or_create(guild(1));
        closed.close();

        let fresh = registry.get_or_create(guild(1));

        assert!(!Arc::ptr_eq(&closed, &fresh));
        assert!(!fresh.is_closed());
        assert!(fresh.enqueue(track("a"), RecordingStatus::new()).is_some());
    }

    #[test]
    fn discard_closed_keeps_live_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(1));
        let session = registry.get_or_create(guild(1));

        assert!(!registry.discard_closed(guild(1)));
        assert!(registry.get(guild(1)).is_some());

        session.close();
        assert!(registry.discard_closed(guild(1)));
        assert!(registry.get(guild(1)).is_none());
    }

    #[test]
    fn get_or_create_returns_same_session() {
        let registry = SessionRegistry::new(Duration::from_secs(1));

        let first = registry.get_or_create(guild(1));
        let second = registry.get_or_create(guild(1));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn teardown_removes_session() {
        let registry = SessionRegistry::new(Duration::from_secs(1));
        let session = registry.get_or_create(guild(1));

        assert!(registry.teardown(guild(1)).await);

        assert!(session.is_closed());
        assert!(registry.get(guild(1)).is_none());
        assert!(!registry.teardown(guild(1)).await);
    }
}
