use bytes::{Bytes, BytesMut};
use std::process::{ExitStatus, Stdio};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::audio::error::PlaybackError;

/// Frecuencia de salida pedida al transcodificador.
pub const SAMPLE_RATE: u32 = 48_000;
/// Canales intercalados de salida.
pub const CHANNELS: u32 = 2;
/// Bytes por muestra (f32 little-endian).
pub const BYTES_PER_SAMPLE: usize = 4;
/// Bytes de un frame PCM (una muestra por canal).
pub const FRAME_BYTES: usize = CHANNELS as usize * BYTES_PER_SAMPLE;

const INPUT_PLACEHOLDER: &str = "{input}";

/// Cómo invocar el transcodificador externo. `{input}` en los argumentos se
/// reemplaza por la URL de stream resuelta.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub program: String,
    pub args: Vec<String>,
    pub chunk_size: usize,
}

impl TranscoderConfig {
    /// ffmpeg pidiendo PCM f32le 48 kHz estéreo por stdout.
    pub fn ffmpeg(program: impl Into<String>, chunk_size: usize) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
            "-i",
            INPUT_PLACEHOLDER,
            "-ac",
            "2",
            "-ar",
            "48000",
            "-f",
            "f32le",
            "pipe:1",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        Self {
            program: program.into(),
            args,
            chunk_size,
        }
    }

    pub fn args_for(&self, input: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, input))
            .collect()
    }

    /// Lanza un proceso ligado a un único track.
    pub fn spawn(&self, input: &str) -> Result<TranscodeProcess, PlaybackError> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Si el worker se aborta sin limpiar, el proceso no queda huérfano
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlaybackError::Transcode(format!("no se pudo lanzar {}: {}", self.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlaybackError::Transcode("stdout no disponible".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PlaybackError::Transcode("stderr no disponible".into()))?;

        debug!("🎛️ Transcodificador lanzado (pid {:?})", child.id());

        Ok(TranscodeProcess {
            child,
            stdout,
            stderr: tokio::spawn(collect_diagnostics(stderr)),
            chunk_size: self.chunk_size.max(FRAME_BYTES),
        })
    }
}

/// Proceso de transcodificación en curso.
pub struct TranscodeProcess {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    chunk_size: usize,
}

impl TranscodeProcess {
    /// Siguiente bloque de PCM; `None` al llegar a EOF.
    ///
    /// Llena el bloque completo salvo en el último, para no partir frames.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, PlaybackError> {
        let mut buffer = BytesMut::with_capacity(self.chunk_size);

        while buffer.len() < self.chunk_size {
            let remaining = (self.chunk_size - buffer.len()) as u64;
            let read = (&mut self.stdout)
                .take(remaining)
                .read_buf(&mut buffer)
                .await
                .map_err(|e| PlaybackError::Transcode(format!("lectura de stdout: {}", e)))?;
            if read == 0 {
                break;
            }
        }

        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer.freeze()))
        }
    }

    /// Espera la salida del proceso (matándolo antes si `kill`) y recoge stderr.
    pub async fn finish(mut self, kill: bool) -> TranscodeReport {
        if kill {
            if let Err(e) = self.child.start_kill() {
                debug!("El transcodificador ya había terminado: {}", e);
            }
        }

        drop(self.stdout);
        let status = match self.child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("⚠️ No se pudo esperar al transcodificador: {}", e);
                None
            }
        };
        // Un nieto huérfano puede retener stderr abierto tras el kill
        let diagnostics = if kill {
            self.stderr.abort();
            String::new()
        } else {
            self.stderr.await.unwrap_or_default()
        };

        TranscodeReport {
            status,
            diagnostics,
            killed: kill,
        }
    }
}

/// Resultado de un proceso ya terminado.
#[derive(Debug)]
pub struct TranscodeReport {
    pub status: Option<ExitStatus>,
    pub diagnostics: String,
    pub killed: bool,
}

impl TranscodeReport {
    pub fn diagnostics(&self) -> Option<&str> {
        let trimmed = self.diagnostics.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Un proceso que matamos nosotros no cuenta como fallo propio: el error
    /// que motivó la muerte ya se reporta por otro lado.
    pub fn into_result(self) -> Result<(), PlaybackError> {
        if self.killed {
            return Ok(());
        }

        match self.status {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(PlaybackError::Transcode(match self.diagnostics() {
                Some(text) => format!("{}: {}", status, text),
                None => status.to_string(),
            })),
            None => Err(PlaybackError::Transcode(
                "estado de salida desconocido".into(),
            )),
        }
    }
}

async fn collect_diagnostics(mut stderr: impl AsyncRead + Unpin) -> String {
    let mut raw = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut raw).await {
        debug!("Lectura de stderr interrumpida: {}", e);
    }
    String::from_utf8_lossy(&raw).into_owned()
}
