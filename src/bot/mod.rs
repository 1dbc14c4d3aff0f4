//! # Bot Module
//!
//! Serenity [`EventHandler`] for the jukebox:
//! - Slash command registration on `ready` (per guild when `GUILD_ID` is set)
//! - Interaction dispatch to [`handlers`]
//! - Voice-state observer: when the bot itself is dropped from voice, the
//!   guild goes through the same teardown as `/leave`
//! - Periodic metadata cache maintenance

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info};

pub mod commands;
pub mod handlers;

use crate::{audio::service::VoiceService, cache::MetadataCache, config::Config};

pub struct JukeboxBot {
    config: Arc<Config>,
    pub service: Arc<VoiceService>,
    cache: Arc<MetadataCache>,
    // `ready` se repite tras cada reconexión del gateway
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, service: Arc<VoiceService>, cache: Arc<MetadataCache>) -> Self {
        Self {
            config,
            service,
            cache,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registra los comandos slash en Discord.
    ///
    /// Los comandos por guild se propagan al instante; los globales pueden
    /// tardar hasta una hora.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(&ctx.http, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(&ctx.http).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let config = self.config.clone();
            let cache = self.cache.clone();
            tokio::spawn(async move {
                maintenance_tasks(config, cache).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detecta cuando el bot sale del canal de voz sin pasar por `/leave`
    /// (expulsado, canal borrado, movido fuera).
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.service.handle_voice_left(guild_id).await;
        }
    }
}

async fn maintenance_tasks(config: Arc<Config>, cache: Arc<MetadataCache>) {
    let mut interval = tokio::time::interval(config.metadata_cache_ttl);

    loop {
        interval.tick().await;

        // Limpiar caché viejo
        cache.cleanup_old_entries();
    }
}
