use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::info;

use crate::{
    audio::{
        error::{ConnectFailure, ResolutionFailure},
        service::{LeaveOutcome, PlayOutcome},
        status::ChannelStatusSink,
    },
    bot::JukeboxBot,
    ui::embeds,
};

const NOT_IN_VOICE: &str = "❌ Debes estar en un canal de voz";

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, guild_id, bot).await?,
        "leave" => handle_leave(ctx, &command, guild_id, bot).await?,
        "play" => handle_play(ctx, &command, guild_id, bot).await?,
        "queue" => handle_queue(ctx, &command, guild_id, bot).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    // El handshake de voz puede pasar los 3s de la interacción
    defer(ctx, command, true).await?;

    let reply = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Some(channel_id) => join_reply(&bot.service.join(guild_id, channel_id).await),
        None => NOT_IN_VOICE.to_string(),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
        .await?;

    Ok(())
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    defer(ctx, command, true).await?;

    let outcome = bot.service.leave(guild_id).await;

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content(leave_reply(&outcome)),
        )
        .await?;

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command, false).await?;

    let user_channel = get_user_voice_channel(ctx, guild_id, command.user.id);
    let status_sink = Arc::new(ChannelStatusSink::new(ctx.http.clone(), command.channel_id));
    let outcome = bot
        .service
        .play(guild_id, user_channel, &query, status_sink)
        .await;

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(play_reply(&outcome, &query)),
        )
        .await?;

    Ok(())
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let snapshot = bot.service.queue(guild_id);

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().embed(embeds::create_queue_embed(&snapshot)),
            ),
        )
        .await?;

    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

fn join_reply(result: &Result<ChannelId, ConnectFailure>) -> String {
    match result {
        Ok(channel_id) => format!("🔊 Conectado a <#{}>", channel_id),
        Err(e) => format!("❌ No se pudo conectar: {}", e),
    }
}

fn leave_reply(outcome: &LeaveOutcome) -> &'static str {
    match outcome {
        LeaveOutcome::Left => "👋 Desconectado del canal de voz",
        LeaveOutcome::NotConnected => "❌ No estoy en un canal de voz",
    }
}

fn play_reply(outcome: &PlayOutcome, query: &str) -> CreateEmbed {
    match outcome {
        PlayOutcome::Queued { track, snapshot } => embeds::create_track_added_embed(track, snapshot),
        PlayOutcome::NotInVoice => embeds::create_error_embed("Sin canal de voz", NOT_IN_VOICE),
        PlayOutcome::ConnectFailed(e) => embeds::create_error_embed(
            "Error de conexión",
            &format!("No se pudo conectar: {}", e),
        ),
        PlayOutcome::NotFound(ResolutionFailure::NotFound(_)) => embeds::create_error_embed(
            "Sin resultados",
            &format!("No se encontraron resultados para `{}`", query),
        ),
        PlayOutcome::NotFound(e) => {
            embeds::create_error_embed("Error al buscar", &e.to_string())
        }
        PlayOutcome::Interrupted => embeds::create_error_embed(
            "Pedido interrumpido",
            &format!("La sesión de voz se cerró mientras se agregaba `{}`, intenta de nuevo", query),
        ),
    }
}

/// Canal de voz del usuario según la caché del gateway.
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
