use thiserror::Error;

/// Fallo al establecer la conexión de voz. Se reporta a quien ejecutó el
/// comando; el registro nunca reintenta por su cuenta.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectFailure {
    #[error("el gestor de voz no está inicializado")]
    GatewayUnavailable,
    #[error("error de transporte al conectar: {0}")]
    Transport(String),
}

/// Fallo al resolver metadata o la URL de stream de un track.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("no se encontraron resultados para `{0}`")]
    NotFound(String),
    #[error("stream no disponible para `{id}`: {reason}")]
    Unavailable { id: String, reason: String },
    #[error("error del resolvedor: {0}")]
    Backend(String),
}

/// Errores de un track dentro del worker de reproducción.
///
/// Todos son locales al track salvo [`PlaybackError::Streaming`], que indica
/// una conexión muerta y escala a un teardown completo del guild.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),
    #[error("fallo del transcodificador: {0}")]
    Transcode(String),
    #[error("fallo de streaming: {0}")]
    Streaming(String),
    #[error("reproducción cancelada")]
    Cancelled,
}

impl PlaybackError {
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, PlaybackError::Streaming(_))
    }
}
