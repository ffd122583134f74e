use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use poise::serenity_prelude::UserId;

use super::{
    chat::ChatChannel,
    song::{Song, SongMetadata},
    types::{PlayerError, PlayerResult, Requester},
    voice::{SongEndSignal, TrackControl, VoiceConnection},
    ytdl::{Playlist, SongResolver},
};

pub fn song_by(title: &str, requester: u64) -> Song {
    Song::new(
        SongMetadata {
            title: Some(title.to_owned()),
            uploader: Some("tester".to_owned()),
            webpage_url: Some(format!("https://example.com/{}", title)),
            duration: Some(60.0),
            ..Default::default()
        },
        Requester::new(UserId::new(requester), format!("user{}", requester)),
    )
}

pub fn song(title: &str) -> Song {
    song_by(title, 1)
}

/// Polls `cond` while letting virtual time move forward in small steps.
pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct VoiceLog {
    played: Vec<String>,
    volume: Option<f32>,
    paused: bool,
    stopped: usize,
    left: bool,
    fail_next: bool,
    fail_next_stop: bool,
    current: Option<SongEndSignal>,
}

#[derive(Default)]
pub struct FakeVoice {
    log: Arc<StdMutex<VoiceLog>>,
    finish_immediately: bool,
}

impl FakeVoice {
    pub fn finishing_immediately() -> FakeVoice {
        FakeVoice {
            finish_immediately: true,
            ..Default::default()
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.log.lock().unwrap().played.clone()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.log.lock().unwrap().volume
    }

    pub fn is_paused(&self) -> bool {
        self.log.lock().unwrap().paused
    }

    pub fn stopped(&self) -> usize {
        self.log.lock().unwrap().stopped
    }

    pub fn has_left(&self) -> bool {
        self.log.lock().unwrap().left
    }

    pub fn fail_next_play(&self) {
        self.log.lock().unwrap().fail_next = true;
    }

    pub fn fail_next_stop(&self) {
        self.log.lock().unwrap().fail_next_stop = true;
    }

    /// Ends the current track as if it played to completion.
    pub fn finish_current(&self) {
        if let Some(signal) = self.log.lock().unwrap().current.take() {
            signal.notify();
        }
    }
}

#[async_trait]
impl VoiceConnection for FakeVoice {
    async fn play(
        &self,
        song: &Song,
        volume: f32,
        on_end: SongEndSignal,
    ) -> anyhow::Result<Box<dyn TrackControl>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_next {
            log.fail_next = false;
            anyhow::bail!("cannot open {}", song.title());
        }
        log.played.push(song.title().to_owned());
        log.volume = Some(volume);
        log.paused = false;
        if self.finish_immediately {
            on_end.notify();
        } else {
            log.current = Some(on_end.clone());
        }
        Ok(Box::new(FakeTrack {
            log: self.log.clone(),
            on_end,
        }))
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().left = true;
        Ok(())
    }
}

struct FakeTrack {
    log: Arc<StdMutex<VoiceLog>>,
    on_end: SongEndSignal,
}

impl TrackControl for FakeTrack {
    fn pause(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().paused = true;
        Ok(())
    }

    fn resume(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().paused = false;
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_next_stop {
            log.fail_next_stop = false;
            anyhow::bail!("track is gone");
        }
        log.stopped += 1;
        drop(log);
        self.on_end.notify();
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        self.log.lock().unwrap().volume = Some(volume);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChat {
    messages: StdMutex<Vec<String>>,
    now_playing: StdMutex<Vec<String>>,
}

impl FakeChat {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn now_playing_titles(&self) -> Vec<String> {
        self.now_playing.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatChannel for FakeChat {
    async fn say(&self, text: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn now_playing(&self, song: &Song) -> anyhow::Result<()> {
        self.now_playing
            .lock()
            .unwrap()
            .push(song.title().to_owned());
        Ok(())
    }
}

/// Resolves every query to a song titled after the query.
#[derive(Default)]
pub struct FakeResolver {
    queries: StdMutex<Vec<String>>,
    failure: StdMutex<Option<String>>,
    failing: StdMutex<HashSet<String>>,
}

impl FakeResolver {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_owned());
    }

    /// Makes only `query` fail to resolve.
    pub fn fail_on(&self, query: &str) {
        self.failing.lock().unwrap().insert(query.to_owned());
    }
}

#[async_trait]
impl SongResolver for FakeResolver {
    async fn resolve(&self, query: &str, requester: &Requester) -> PlayerResult<Song> {
        self.queries.lock().unwrap().push(query.to_owned());
        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return Err(PlayerError::Extractor(reason));
        }
        if self.failing.lock().unwrap().contains(query) {
            return Err(PlayerError::NoMatches(query.to_owned()));
        }
        Ok(Song::new(
            SongMetadata {
                title: Some(query.to_owned()),
                webpage_url: Some(query.to_owned()),
                ..Default::default()
            },
            requester.clone(),
        ))
    }

    async fn playlist(&self, url: &str) -> PlayerResult<Playlist> {
        Err(PlayerError::NoMatches(url.to_owned()))
    }
}
