use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod sources;
mod ui;

use crate::audio::{
    connection::ConnectionRegistry, engine::PlaybackEngine, service::VoiceService,
    session::SessionRegistry, songbird_voice::SongbirdGateway, transcoder::TranscoderConfig,
};
use crate::bot::JukeboxBot;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::sources::{CachedResolver, TrackResolver, YtDlpResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Resolución con caché de metadata
    let cache = Arc::new(MetadataCache::new(
        config.metadata_cache_ttl,
        config.metadata_cache_capacity,
    ));
    let resolver: Arc<dyn TrackResolver> = Arc::new(CachedResolver::new(
        Arc::new(YtDlpResolver::new(config.ytdlp_path.clone())),
        cache.clone(),
    ));

    // Capa de voz
    let songbird = Songbird::serenity();
    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), config.sink_buffer_chunks));
    let sessions = Arc::new(SessionRegistry::new(config.teardown_timeout));
    let connections = ConnectionRegistry::new(gateway, sessions);
    let engine = PlaybackEngine::new(
        resolver.clone(),
        TranscoderConfig::ffmpeg(config.transcoder_path.clone(), config.pcm_chunk_size),
        connections.clone(),
        config.sink_drain_timeout,
    );
    let service = Arc::new(VoiceService::new(
        connections,
        engine,
        resolver,
        config.connect_warmup,
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = JukeboxBot::new(config.clone(), service.clone(), cache);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        service.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.transcoder_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
