use std::{fmt, sync::Arc};

use serde::Deserialize;

use super::types::Requester;

/// The subset of the extractor's info dict the player cares about.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SongMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub uploader_url: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default, rename = "url")]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Song {
    metadata: Arc<SongMetadata>,
    requester: Requester,
}

impl Song {
    pub fn new(metadata: SongMetadata, requester: Requester) -> Song {
        Song {
            metadata: Arc::new(metadata),
            requester,
        }
    }

    pub fn metadata(&self) -> &SongMetadata {
        &self.metadata
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn title(&self) -> &str {
        self.metadata.title.as_deref().unwrap_or("unknown")
    }

    pub fn uploader(&self) -> &str {
        self.metadata.uploader.as_deref().unwrap_or("unknown")
    }

    /// Page URL used to (re)open the stream at play time; the direct stream
    /// URL expires, so it is only a fallback.
    pub fn url(&self) -> Option<&str> {
        self.metadata
            .webpage_url
            .as_deref()
            .or(self.metadata.stream_url.as_deref())
    }

    pub fn duration_string(&self) -> String {
        match self.metadata.duration {
            Some(secs) => format_duration(secs as u64),
            None => "unknown duration".to_string(),
        }
    }

    pub fn upload_date_string(&self) -> Option<String> {
        self.metadata.upload_date.as_deref().map(format_upload_date)
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**{}** by **{}**", self.title(), self.uploader())
    }
}

pub fn format_duration(duration: u64) -> String {
    let (minutes, seconds) = (duration / 60, duration % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let parts: Vec<String> = [
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ]
    .iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, unit)| {
        if *n == 1 {
            format!("{} {}", n, unit)
        } else {
            format!("{} {}s", n, unit)
        }
    })
    .collect();

    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(", ")
}

// YYYYMMDD -> DD.MM.YYYY
pub fn format_upload_date(date: &str) -> String {
    if date.len() != 8 || !date.chars().all(|c| c.is_ascii_digit()) {
        return date.to_string();
    }
    format!("{}.{}.{}", &date[6..8], &date[4..6], &date[0..4])
}
