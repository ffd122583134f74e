use anyhow::{anyhow, Context};
use async_trait::async_trait;
use poise::serenity_prelude::GuildId;
use tokio::sync::Mutex as SerenityMutex;
use songbird::{
    input::{Input, YoutubeDl},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Semaphore;

use super::song::Song;

/// Wakes the playback loop when a track finishes. Fires at most once per
/// track even if the transport reports both an error and an end.
#[derive(Clone)]
pub struct SongEndSignal {
    fired: Arc<AtomicBool>,
    song_ended: Arc<Semaphore>,
}

impl SongEndSignal {
    pub fn new(song_ended: Arc<Semaphore>) -> SongEndSignal {
        SongEndSignal {
            fired: Arc::new(AtomicBool::new(false)),
            song_ended,
        }
    }

    pub fn notify(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.song_ended.add_permits(1);
        }
    }
}

pub trait TrackControl: Send + Sync {
    fn pause(&self) -> anyhow::Result<()>;
    fn resume(&self) -> anyhow::Result<()>;
    fn stop(&self) -> anyhow::Result<()>;
    fn set_volume(&self, volume: f32) -> anyhow::Result<()>;
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn play(
        &self,
        song: &Song,
        volume: f32,
        on_end: SongEndSignal,
    ) -> anyhow::Result<Box<dyn TrackControl>>;

    async fn leave(&self) -> anyhow::Result<()>;
}

impl TrackControl for TrackHandle {
    fn pause(&self) -> anyhow::Result<()> {
        TrackHandle::pause(self).map_err(|e| anyhow!(e.to_string()))
    }

    fn resume(&self) -> anyhow::Result<()> {
        TrackHandle::play(self).map_err(|e| anyhow!(e.to_string()))
    }

    fn stop(&self) -> anyhow::Result<()> {
        TrackHandle::stop(self).map_err(|e| anyhow!(e.to_string()))
    }

    fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        TrackHandle::set_volume(self, volume).map_err(|e| anyhow!(e.to_string()))
    }
}

pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    handler: Arc<SerenityMutex<Call>>,
    http_client: reqwest::Client,
    ytdlp: &'static str,
}

impl SongbirdVoice {
    pub fn new(
        manager: Arc<Songbird>,
        guild_id: GuildId,
        handler: Arc<SerenityMutex<Call>>,
        http_client: reqwest::Client,
        ytdlp: &'static str,
    ) -> SongbirdVoice {
        SongbirdVoice {
            manager,
            guild_id,
            handler,
            http_client,
            ytdlp,
        }
    }
}

#[async_trait]
impl VoiceConnection for SongbirdVoice {
    async fn play(
        &self,
        song: &Song,
        volume: f32,
        on_end: SongEndSignal,
    ) -> anyhow::Result<Box<dyn TrackControl>> {
        let url = song.url().context("song has no playable url")?.to_owned();
        let source = YoutubeDl::new_ytdl_like(self.ytdlp, self.http_client.clone(), url);

        let handle = {
            let mut handler = self.handler.lock().await;
            handler.play_input(Input::from(source))
        };
        if let Err(why) = handle.set_volume(volume) {
            log::warn!("SongbirdVoice::play: failed to set volume: {:?}", why);
        }
        watch_track_end(&handle, &[TrackEvent::End, TrackEvent::Error], |event| {
            handle
                .add_event(
                    Event::Track(event),
                    SongEndNotifier {
                        signal: on_end.clone(),
                    },
                )
                .map_err(|e| anyhow!(e.to_string()))
        })?;
        Ok(Box::new(handle))
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| anyhow!(e.to_string()))
    }
}

/// Registers end notifications for a track that is already playing. If any
/// registration fails the track is stopped, so no unwatched track keeps
/// running alongside the next one.
fn watch_track_end(
    track: &dyn TrackControl,
    events: &[TrackEvent],
    mut add_event: impl FnMut(TrackEvent) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for event in events {
        if let Err(why) = add_event(*event) {
            if let Err(stop_err) = track.stop() {
                log::warn!("watch_track_end: failed to stop track: {:?}", stop_err);
            }
            return Err(why);
        }
    }
    Ok(())
}

struct SongEndNotifier {
    signal: SongEndSignal,
}

#[async_trait]
impl VoiceEventHandler for SongEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                log::info!("track finished: {:?}", state.playing);
            }
        }
        self.signal.notify();
        None
    }
}
