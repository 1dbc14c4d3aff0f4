use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    http::Http,
    model::{
        application::{Command, CommandOptionType},
        id::GuildId,
    },
};

/// Registra comandos globales
pub async fn register_global_commands(http: &Http) -> Result<()> {
    Command::set_global_commands(http, all_commands()).await?;
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(http: &Http, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        play_command(),
        queue_command(),
    ]
}

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot y vacía la cola")
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción por URL o búsqueda")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}
