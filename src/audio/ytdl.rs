use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command as TokioCommand;

use super::{
    config::ytdl::WATCH_URL,
    song::{Song, SongMetadata},
    types::{PlayerError, PlayerResult, Requester},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub title: Option<String>,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

/// Turns search terms and URLs into songs.
#[async_trait]
pub trait SongResolver: Send + Sync {
    async fn resolve(&self, query: &str, requester: &Requester) -> PlayerResult<Song>;
    async fn playlist(&self, url: &str) -> PlayerResult<Playlist>;
}

pub fn is_playlist_url(query: &str) -> bool {
    let query = query.trim();
    (query.starts_with("http://") || query.starts_with("https://"))
        && (query.contains("?list=") || query.contains("&list="))
}

pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> YtDlp {
        YtDlp {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> PlayerResult<String> {
        let out = TokioCommand::new(&self.binary)
            .args(["--quiet", "--no-warnings", "--no-check-certificate"])
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PlayerError::Extractor(format!("failed to run {}: {}", self.binary, e)))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("extractor exited with an error")
                .trim()
                .to_owned();
            log::warn!("{} {:?} failed: {}", self.binary, args, reason);
            return Err(PlayerError::Extractor(reason));
        }
        String::from_utf8(out.stdout).map_err(|e| PlayerError::Extractor(e.to_string()))
    }
}

#[async_trait]
impl SongResolver for YtDlp {
    async fn resolve(&self, query: &str, requester: &Requester) -> PlayerResult<Song> {
        let flat = self
            .run(&[
                "--flat-playlist",
                "--no-playlist",
                "--default-search",
                "auto",
                "-J",
                query,
            ])
            .await?;
        let url = parse_json(&flat)
            .and_then(first_entry)
            .and_then(|entry| entry_url(&entry))
            .ok_or_else(|| PlayerError::NoMatches(query.to_owned()))?;

        let processed = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "-J", url.as_str()])
            .await?;
        let info = parse_json(&processed).ok_or_else(|| PlayerError::FetchFailed(url.clone()))?;
        let info = first_entry(info).ok_or_else(|| PlayerError::NoEntries(url.clone()))?;

        let mut metadata: SongMetadata = serde_json::from_value(info)
            .map_err(|e| PlayerError::Extractor(format!("unexpected extractor output: {}", e)))?;
        if metadata.webpage_url.is_none() {
            metadata.webpage_url = Some(url);
        }
        log::info!("resolved {:?} to {:?}", query, metadata.title);
        Ok(Song::new(metadata, requester.clone()))
    }

    async fn playlist(&self, url: &str) -> PlayerResult<Playlist> {
        let out = self.run(&["--flat-playlist", "-j", url]).await?;
        let playlist = parse_flat_playlist(&out);
        if playlist.entries.is_empty() {
            return Err(PlayerError::NoMatches(url.to_owned()));
        }
        Ok(playlist)
    }
}

fn parse_json(out: &str) -> Option<Value> {
    let out = out.trim();
    if out.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(out) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(why) => {
            log::error!("failed to parse extractor output: {}", why);
            None
        }
    }
}

/// A search or playlist result is reduced to its first non-null entry;
/// anything else is already a single item.
fn first_entry(value: Value) -> Option<Value> {
    match value {
        Value::Object(mut map) => match map.remove("entries") {
            Some(Value::Array(entries)) => entries.into_iter().find(|e| !e.is_null()),
            Some(_) => None,
            None => Some(Value::Object(map)),
        },
        _ => None,
    }
}

fn entry_url(entry: &Value) -> Option<String> {
    let field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    if let Some(url) = field("webpage_url") {
        return Some(url);
    }
    match field("url") {
        Some(url) if url.starts_with("http") => Some(url),
        _ => field("id").map(|id| format!("{}{}", WATCH_URL, id)),
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylistLine {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    playlist_title: Option<String>,
}

fn parse_flat_playlist(out: &str) -> Playlist {
    let mut title = None;
    let entries = out
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Option<FlatPlaylistLine>>(line) {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                log::warn!("skipping unavailable playlist entry");
                None
            }
            Err(why) => {
                log::error!("failed to parse playlist entry: {} {}", why, line);
                None
            }
        })
        .filter_map(|entry| {
            if title.is_none() {
                title = entry.playlist_title.clone();
            }
            let url = match (entry.url, entry.id) {
                (Some(url), _) if url.starts_with("http") => url,
                (_, Some(id)) => format!("{}{}", WATCH_URL, id),
                _ => {
                    log::warn!("playlist entry {:?} has no url", entry.title);
                    return None;
                }
            };
            Some(PlaylistEntry {
                title: entry.title,
                url,
            })
        })
        .collect();
    Playlist {
        title: title.unwrap_or_else(|| "playlist".to_owned()),
        entries,
    }
}
