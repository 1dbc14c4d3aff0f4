//! Registro de conexiones de voz: una única conexión viva por guild.
//!
//! El registro es el único dueño de cada [`VoiceConnection`]; las sesiones y
//! el worker solo guardan un [`ConnectionRef`] no propietario. Conectar
//! siempre retira primero la conexión anterior, y toda baja (comando `leave`,
//! caída inesperada o fallo de streaming) pasa por el mismo teardown.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{
    error::{ConnectFailure, PlaybackError},
    session::SessionRegistry,
};

/// Destino de PCM crudo de una conexión, válido para un solo track.
#[async_trait]
pub trait AudioSink: Send {
    /// Entrega un bloque de PCM. Falla si la conexión ya no acepta audio.
    async fn write(&mut self, chunk: Bytes) -> Result<(), PlaybackError>;

    /// Cierra la entrada y espera a que el audio en buffer termine de sonar.
    async fn finish(&mut self) -> Result<(), PlaybackError>;

    /// Corta el audio inmediatamente.
    async fn abort(&mut self);
}

/// Sesión de audio en tiempo real de un guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    async fn open_sink(&self) -> Result<Box<dyn AudioSink>, PlaybackError>;

    /// Indica si el transporte sigue conectado.
    async fn is_active(&self) -> bool;

    /// Cierre ordenado. Solo lo invoca el registro.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Establece conexiones de voz (songbird en producción).
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        watcher: DisconnectWatcher,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectFailure>;
}

/// Observador que la conexión dispara si el transporte se cae solo.
///
/// Lleva la generación de la conexión que lo creó: una notificación tardía
/// de una conexión ya reemplazada no toca a la nueva.
#[derive(Clone)]
pub struct DisconnectWatcher {
    registry: Weak<ConnectionRegistry>,
    guild_id: GuildId,
    generation: u64,
}

impl DisconnectWatcher {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Retira la conexión en una tarea aparte; no bloquea al llamador.
    pub fn notify(&self, reason: impl Into<String>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let guild_id = self.guild_id;
        let generation = self.generation;
        let reason = reason.into();

        tokio::spawn(async move {
            registry.retire(guild_id, Some(generation), &reason).await;
        });
    }
}

/// Referencia no propietaria a la conexión activa de un guild.
#[derive(Clone)]
pub struct ConnectionRef {
    generation: u64,
    channel_id: ChannelId,
    handle: Weak<dyn VoiceConnection>,
}

impl ConnectionRef {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// `None` si el registro ya invalidó la conexión.
    pub fn upgrade(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.handle.upgrade()
    }
}

struct LiveConnection {
    generation: u64,
    handle: Arc<dyn VoiceConnection>,
}

impl LiveConnection {
    fn reference(&self) -> ConnectionRef {
        ConnectionRef {
            generation: self.generation,
            channel_id: self.handle.channel_id(),
            handle: Arc::downgrade(&self.handle),
        }
    }
}

pub struct ConnectionRegistry {
    me: Weak<ConnectionRegistry>,
    gateway: Arc<dyn VoiceGateway>,
    sessions: Arc<SessionRegistry>,
    live: DashMap<GuildId, LiveConnection>,
    // Serializa connect/disconnect por guild, nunca global
    lifecycle: DashMap<GuildId, Arc<Mutex<()>>>,
    generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(gateway: Arc<dyn VoiceGateway>, sessions: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            gateway,
            sessions,
            live: DashMap::new(),
            lifecycle: DashMap::new(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Conecta al canal indicado, retirando antes cualquier conexión previa.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionRef, ConnectFailure> {
        let connected = {
            let lock = self.lifecycle_lock(guild_id);
            let _guard = lock.lock().await;
            self.connect_locked(guild_id, channel_id).await
        };
        self.prune_lifecycle_lock(guild_id);
        connected
    }

    async fn connect_locked(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionRef, ConnectFailure> {
        self.teardown_locked(guild_id, None, "reconexión").await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watcher = DisconnectWatcher {
            registry: self.me.clone(),
            guild_id,
            generation,
        };

        let handle = match self.gateway.connect(guild_id, channel_id, watcher).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("❌ No se pudo conectar al canal de voz en guild {}: {}", guild_id, e);
                return Err(e);
            }
        };

        let live = LiveConnection { generation, handle };
        let reference = live.reference();
        self.live.insert(guild_id, live);

        info!(
            "🔊 Conectado al canal {} en guild {} (generación {})",
            channel_id, guild_id, generation
        );
        Ok(reference)
    }

    /// Cierra la conexión si existe y descarta la sesión del guild.
    ///
    /// Seguro sin conexión previa. Devuelve `true` si había una conexión viva.
    pub async fn disconnect(&self, guild_id: GuildId) -> bool {
        self.retire(guild_id, None, "desconexión solicitada").await
    }

    /// Retira la conexión de una generación concreta (o la actual si es
    /// `None`). Una generación ya reemplazada se ignora.
    pub async fn retire(&self, guild_id: GuildId, generation: Option<u64>, reason: &str) -> bool {
        let retired = {
            let lock = self.lifecycle_lock(guild_id);
            let _guard = lock.lock().await;
            self.teardown_locked(guild_id, generation, reason).await
        };
        self.prune_lifecycle_lock(guild_id);
        retired
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceConnection>> {
        self.live.get(&guild_id).map(|live| live.handle.clone())
    }

    pub fn reference(&self, guild_id: GuildId) -> Option<ConnectionRef> {
        self.live.get(&guild_id).map(|live| live.reference())
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.live.contains_key(&guild_id)
    }

    pub fn connected_guilds(&self) -> Vec<GuildId> {
        self.live.iter().map(|entry| *entry.key()).collect()
    }

    async fn teardown_locked(
        &self,
        guild_id: GuildId,
        generation: Option<u64>,
        reason: &str,
    ) -> bool {
        let removed = match generation {
            Some(expected) => {
                let removed = self
                    .live
                    .remove_if(&guild_id, |_, live| live.generation == expected);
                if removed.is_none() {
                    debug!(
                        "Generación {} de guild {} ya retirada, se ignora ({})",
                        expected, guild_id, reason
                    );
                    // La sesión que escaló ya está cerrada y no debe quedar en el registro
                    self.sessions.discard_closed(guild_id);
                    return false;
                }
                removed
            }
            None => self.live.remove(&guild_id),
        };

        // Primero el worker: mata el transcodificador y corta el sink
        self.sessions.teardown(guild_id).await;

        match removed {
            Some((_, live)) => {
                if let Err(e) = live.handle.close().await {
                    warn!("⚠️ Error al cerrar la conexión de voz en guild {}: {:?}", guild_id, e);
                }
                info!("👋 Conexión de voz retirada en guild {} ({})", guild_id, reason);
                true
            }
            None => false,
        }
    }

    fn lifecycle_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.lifecycle
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Suelta el lock de un guild sin conexión que nadie más está usando.
    ///
    /// `remove_if` retiene el shard: nadie puede clonar el lock mientras se
    /// cuenta su `strong_count`.
    fn prune_lifecycle_lock(&self, guild_id: GuildId) {
        self.lifecycle.remove_if(&guild_id, |_, lock| {
            Arc::strong_count(lock) == 1 && !self.live.contains_key(&guild_id)
        });
    }
}
