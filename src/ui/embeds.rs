use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::track::{QueueSnapshot, Track};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Filas visibles antes de resumir el resto (el límite de Discord es 4096 caracteres)
const MAX_QUEUE_LINES: usize = 15;

const EMPTY_QUEUE: &str = "*(vacía)*";

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**[{}]({})**", track.title(), track.link()))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_label(track.duration()), true)
        .url(track.link());

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción, con la cola resultante
pub fn create_track_added_embed(track: &Track, snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Agregado a la Cola")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_label(track.duration()), true)
        .field("📋 Cola", queue_lines(snapshot), false)
        .field("⏳ Total", format_duration(snapshot.total_duration), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Crea un embed con la cola visible de un guild
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let color = if snapshot.is_empty() {
        colors::NEUTRAL_GRAY
    } else {
        colors::INFO_BLUE
    };

    CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .description(queue_lines(snapshot))
        .field("⏳ Total", format_duration(snapshot.total_duration), true)
        .field("🎶 Canciones", snapshot.len().to_string(), true)
        .color(color)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Aviso de que un track se saltó
pub fn create_track_failed_embed(track: &Track, reason: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("⚠️ No se pudo reproducir")
        .description(format!("**{}**: {}", track.title(), reason))
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Lista numerada de la cola, `*(vacía)*` si no hay nada.
pub fn queue_lines(snapshot: &QueueSnapshot) -> String {
    if snapshot.is_empty() {
        return EMPTY_QUEUE.to_string();
    }

    let mut lines: Vec<String> = snapshot
        .entries
        .iter()
        .take(MAX_QUEUE_LINES)
        .map(|entry| match entry.duration {
            Some(duration) => format!(
                "{}. {} `[{}]`",
                entry.position,
                entry.title,
                format_duration(duration)
            ),
            None => format!("{}. {}", entry.position, entry.title),
        })
        .collect();

    let hidden = snapshot.len().saturating_sub(MAX_QUEUE_LINES);
    if hidden > 0 {
        lines.push(format!("… y {} más", hidden));
    }

    lines.join("\n")
}

/// `mm:ss` por debajo de una hora, `hh:mm:ss` desde ahí.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn duration_label(duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format_duration(duration),
        None => "🔴 En vivo".to_string(),
    }
}
