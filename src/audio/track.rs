use std::time::Duration;

/// Metadata resuelta de un elemento reproducible.
///
/// Inmutable una vez construido. Para quitarlo de la cola visible se
/// identifica por `source_id`, no por identidad de objeto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    source_id: String,
    duration: Option<Duration>,
    thumbnail: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_id: source_id.into(),
            duration: None,
            thumbnail: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    /// Enlace corto al video original
    pub fn link(&self) -> String {
        format!("https://youtu.be/{}", self.source_id)
    }
}

/// Una fila de la cola visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub position: usize,
    pub title: String,
    pub duration: Option<Duration>,
}

/// Proyección de la cola visible en un instante dado, lista para renderizar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn from_tracks<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Self {
        let entries: Vec<QueueEntry> = tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| QueueEntry {
                position: index + 1,
                title: track.title().to_string(),
                duration: track.duration(),
            })
            .collect();

        // Duración ausente cuenta como cero
        let total_duration = entries.iter().filter_map(|entry| entry.duration).sum();

        Self {
            entries,
            total_duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.title.as_str()).collect()
    }
}
