use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use poise::serenity_prelude::UserId;
use tokio::{
    sync::{Mutex, Semaphore},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use super::config::audio as audio_config;
use super::{
    chat::ChatChannel,
    song::Song,
    song_queue::SongQueue,
    types::{PlayerError, PlayerResult, Requester, SkipOutcome},
    voice::{SongEndSignal, TrackControl, VoiceConnection},
    ytdl::{PlaylistEntry, SongResolver},
};

pub struct PlayerOptions {
    pub autoplay_tracks: Vec<String>,
    pub volume: u8,
    pub queue_len: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        PlayerOptions {
            autoplay_tracks: audio_config::AUTOPLAY_TRACKS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            volume: audio_config::DEFAULT_VOLUME,
            queue_len: audio_config::MAX_QUEUE_LEN,
        }
    }
}

/// Playback state of one guild. Owns the single playback loop task, which
/// consumes `queue` and drives `voice`.
pub struct AudioState {
    queue: SongQueue,
    voice: Arc<dyn VoiceConnection>,
    resolver: Arc<dyn SongResolver>,
    chat: Mutex<Arc<dyn ChatChannel>>,

    current_song: Mutex<Option<Song>>,
    track_handle: Mutex<Option<Box<dyn TrackControl>>>,
    song_ended: Arc<Semaphore>,
    skip_votes: Mutex<HashSet<UserId>>,

    is_looping: AtomicBool,
    is_autoplay: AtomicBool,
    is_paused: AtomicBool,
    skip_requested: AtomicBool,
    volume: AtomicU8,
    autoplay_streak: AtomicUsize,
    autoplay_turn: AtomicUsize,
    autoplay_tracks: Vec<String>,
    autoplay_requester: Requester,

    shutdown: CancellationToken,
}

impl AudioState {
    pub fn new(
        voice: Arc<dyn VoiceConnection>,
        resolver: Arc<dyn SongResolver>,
        chat: Arc<dyn ChatChannel>,
        owner: Requester,
        options: PlayerOptions,
    ) -> Arc<AudioState> {
        let audio_state = AudioState {
            queue: SongQueue::new(options.queue_len),
            voice,
            resolver,
            chat: Mutex::new(chat),

            current_song: Mutex::new(None),
            track_handle: Mutex::new(None),
            song_ended: Arc::new(Semaphore::new(0)),
            skip_votes: Mutex::new(HashSet::new()),

            is_looping: AtomicBool::new(false),
            is_autoplay: AtomicBool::new(true),
            is_paused: AtomicBool::new(false),
            skip_requested: AtomicBool::new(false),
            volume: AtomicU8::new(options.volume.min(audio_config::MAX_VOLUME)),
            autoplay_streak: AtomicUsize::new(0),
            autoplay_turn: AtomicUsize::new(0),
            autoplay_tracks: options.autoplay_tracks,
            autoplay_requester: owner,

            shutdown: CancellationToken::new(),
        };
        let audio_state = Arc::new(audio_state);
        {
            let audio_state = audio_state.clone();
            tokio::spawn(async move {
                audio_state.play_audio_loop().await;
            });
        }
        audio_state
    }

    /// Announcements follow the channel of the latest command.
    pub async fn set_chat(&self, chat: Arc<dyn ChatChannel>) {
        *self.chat.lock().await = chat;
    }

    async fn say(&self, text: &str) {
        let chat = self.chat.lock().await.clone();
        if let Err(why) = chat.say(text).await {
            log::error!("AudioState::say: {:?}", why);
        }
    }

    async fn play_audio_loop(self: &Arc<Self>) {
        let mut replay: Option<Song> = None;
        loop {
            let song = match replay.take() {
                Some(song) => song,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return,
                        next = self.next_song() => next,
                    };
                    match next {
                        Some(song) => song,
                        None => {
                            self.retire().await;
                            return;
                        }
                    }
                }
            };

            if !self.start_song(song).await {
                continue;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                permit = self.song_ended.acquire() => match permit {
                    Ok(permit) => permit.forget(),
                    Err(_) => return,
                },
            }

            *self.track_handle.lock().await = None;
            self.is_paused.store(false, Ordering::Relaxed);
            let finished = self.current_song.lock().await.take();
            let skipped = self.skip_requested.swap(false, Ordering::AcqRel);
            if self.is_looping() && !skipped {
                replay = finished;
            }
        }
    }

    /// Picks what to play next, or `None` when the player should leave.
    async fn next_song(self: &Arc<Self>) -> Option<Song> {
        if self.autoplay_streak.load(Ordering::Acquire) >= audio_config::MAX_AUTOPLAY_STREAK {
            log::info!("autoplay streak reached, turning autoplay off");
            self.is_autoplay.store(false, Ordering::Release);
            self.autoplay_streak.store(0, Ordering::Release);
        }

        if self.is_autoplay() {
            match timeout(audio_config::AUTOPLAY_WAIT, self.queue.pop()).await {
                Ok(song) => {
                    self.autoplay_streak.store(0, Ordering::Release);
                    song
                }
                Err(_) => match self.autoplay_song().await {
                    Ok(song) => {
                        self.autoplay_streak.fetch_add(1, Ordering::AcqRel);
                        self.say(&format!("Autoplaying {}", song)).await;
                        Some(song)
                    }
                    Err(why) => {
                        log::error!("AudioState::next_song: autoplay failed: {}", why);
                        self.say(&why.to_string()).await;
                        None
                    }
                },
            }
        } else {
            match timeout(audio_config::IDLE_TIMEOUT, self.queue.pop()).await {
                Ok(song) => {
                    self.autoplay_streak.store(0, Ordering::Release);
                    song
                }
                Err(_) => {
                    self.say(&format!(
                        "Nothing was requested for {} minutes, leaving the voice channel.",
                        audio_config::IDLE_TIMEOUT.as_secs() / 60
                    ))
                    .await;
                    None
                }
            }
        }
    }

    async fn autoplay_song(&self) -> PlayerResult<Song> {
        if self.autoplay_tracks.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        let turn = self.autoplay_turn.fetch_add(1, Ordering::AcqRel);
        let url = &self.autoplay_tracks[turn % self.autoplay_tracks.len()];
        self.resolver.resolve(url, &self.autoplay_requester).await
    }

    // returns false if the song could not be started
    async fn start_song(self: &Arc<Self>, song: Song) -> bool {
        self.skip_requested.store(false, Ordering::Release);
        let on_end = SongEndSignal::new(self.song_ended.clone());
        let volume = self.volume_ratio();
        let handle = match self.voice.play(&song, volume, on_end).await {
            Ok(handle) => handle,
            Err(why) => {
                log::error!("AudioState::start_song: {:?}", why);
                self.say(&PlayerError::Voice(why.to_string()).to_string())
                    .await;
                return false;
            }
        };
        log::info!(
            "now playing {} requested by {}",
            song.title(),
            song.requester().name
        );

        self.skip_votes.lock().await.clear();
        self.is_paused.store(false, Ordering::Relaxed);
        *self.track_handle.lock().await = Some(handle);
        *self.current_song.lock().await = Some(song.clone());

        let chat = self.chat.lock().await.clone();
        if let Err(why) = chat.now_playing(&song).await {
            log::error!("AudioState::start_song: failed to announce: {:?}", why);
        }
        true
    }

    async fn retire(&self) {
        self.queue.close().await;
        if let Err(why) = self.voice.leave().await {
            log::error!("AudioState::retire: handler failed to leave: {:?}", why);
        }
    }

    /// False once the player left its channel; a retired player refuses
    /// new songs with `NotConnected`.
    pub fn is_alive(&self) -> bool {
        !self.queue.is_closed()
    }

    pub async fn is_playing(&self) -> bool {
        self.current_song.lock().await.is_some()
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping.load(Ordering::Acquire)
    }

    pub fn is_autoplay(&self) -> bool {
        self.is_autoplay.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Acquire)
    }

    fn volume_ratio(&self) -> f32 {
        self.volume() as f32 / 100.0
    }

    async fn require_playing(&self) -> PlayerResult<()> {
        if self.is_playing().await {
            Ok(())
        } else {
            Err(PlayerError::NotPlaying)
        }
    }

    pub async fn enqueue(&self, song: Song) -> PlayerResult<()> {
        self.queue.push(song).await
    }

    /// Resolves and queues playlist entries in order. Entries that fail to
    /// resolve are announced and skipped; a failed enqueue stops the load.
    /// Returns the number of songs queued and the error that stopped it.
    pub async fn enqueue_many(
        &self,
        entries: &[PlaylistEntry],
        requester: &Requester,
    ) -> (usize, Option<PlayerError>) {
        let mut queued = 0;
        for entry in entries {
            let song = match self.resolver.resolve(&entry.url, requester).await {
                Ok(song) => song,
                Err(why) => {
                    log::warn!(
                        "playlist entry {:?} ({}) failed: {}",
                        entry.title, entry.url, why
                    );
                    self.say(&why.to_string()).await;
                    continue;
                }
            };
            if let Err(why) = self.enqueue(song).await {
                return (queued, Some(why));
            }
            queued += 1;
        }
        (queued, None)
    }

    pub async fn now_playing(&self) -> Option<Song> {
        self.current_song.lock().await.clone()
    }

    pub async fn skip_vote(&self, voter: UserId) -> PlayerResult<SkipOutcome> {
        let requester = match &*self.current_song.lock().await {
            Some(song) => song.requester().id,
            None => return Err(PlayerError::NotPlaying),
        };
        if voter == requester {
            self.skip().await?;
            return Ok(SkipOutcome::Skipped);
        }

        let votes = {
            let mut skip_votes = self.skip_votes.lock().await;
            if !skip_votes.insert(voter) {
                return Ok(SkipOutcome::AlreadyVoted);
            }
            skip_votes.len()
        };
        if votes >= audio_config::SKIP_QUORUM {
            self.skip().await?;
            Ok(SkipOutcome::Skipped)
        } else {
            Ok(SkipOutcome::Voted {
                votes,
                required: audio_config::SKIP_QUORUM,
            })
        }
    }

    pub async fn skip(&self) -> PlayerResult<()> {
        self.skip_votes.lock().await.clear();
        let track_handle = self.track_handle.lock().await;
        let handle = track_handle.as_ref().ok_or(PlayerError::NotPlaying)?;
        self.stop_track(&**handle)
    }

    // the flag is raised before stopping so the loop never sees the end first
    fn stop_track(&self, handle: &dyn TrackControl) -> PlayerResult<()> {
        self.skip_requested.store(true, Ordering::Release);
        handle.stop().map_err(|e| {
            self.skip_requested.store(false, Ordering::Release);
            PlayerError::Voice(e.to_string())
        })
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        let track_handle = self.track_handle.lock().await;
        let handle = track_handle.as_ref().ok_or(PlayerError::NotPlaying)?;
        handle
            .pause()
            .map_err(|e| PlayerError::Voice(e.to_string()))?;
        self.is_paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub async fn resume(&self) -> PlayerResult<()> {
        let track_handle = self.track_handle.lock().await;
        let handle = track_handle.as_ref().ok_or(PlayerError::NotPlaying)?;
        handle
            .resume()
            .map_err(|e| PlayerError::Voice(e.to_string()))?;
        self.is_paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::Relaxed)
    }

    /// Drops the queue and ends the current track. Returns whether a track
    /// was stopped.
    pub async fn stop(&self) -> PlayerResult<bool> {
        self.queue.clear().await;
        let track_handle = self.track_handle.lock().await;
        match track_handle.as_ref() {
            Some(handle) => {
                self.stop_track(&**handle)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn set_volume(&self, volume: i64) -> PlayerResult<()> {
        self.require_playing().await?;
        let volume = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= audio_config::MAX_VOLUME)
            .ok_or(PlayerError::InvalidVolume(volume))?;
        self.volume.store(volume, Ordering::Release);
        if let Some(handle) = self.track_handle.lock().await.as_ref() {
            handle
                .set_volume(self.volume_ratio())
                .map_err(|e| PlayerError::Voice(e.to_string()))?;
        }
        Ok(())
    }

    // on success, returns whether the current song is now looping
    pub async fn toggle_loop(&self) -> PlayerResult<bool> {
        self.require_playing().await?;
        Ok(!self.is_looping.fetch_xor(true, Ordering::AcqRel))
    }

    pub async fn toggle_autoplay(&self) -> PlayerResult<bool> {
        self.require_playing().await?;
        let enabled = !self.is_autoplay.fetch_xor(true, Ordering::AcqRel);
        if enabled {
            self.autoplay_streak.store(0, Ordering::Release);
        }
        Ok(enabled)
    }

    pub async fn shuffle(&self) -> PlayerResult<()> {
        self.queue.shuffle().await
    }

    /// Removes a song by its 1-based queue position.
    pub async fn remove(&self, position: usize) -> PlayerResult<Song> {
        if position == 0 {
            return Err(PlayerError::InvalidPosition(position));
        }
        self.queue.remove(position - 1).await
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Returns the songs of a 1-based page together with the page count.
    pub async fn queue_page(&self, page: usize) -> PlayerResult<(Vec<Song>, usize)> {
        let len = self.queue.len().await;
        if len == 0 {
            return Err(PlayerError::EmptyQueue);
        }
        let pages = len.div_ceil(audio_config::QUEUE_PAGE_SIZE);
        if page == 0 || page > pages {
            return Err(PlayerError::InvalidPage { page, pages });
        }
        let start = (page - 1) * audio_config::QUEUE_PAGE_SIZE;
        let songs = self
            .queue
            .page(start, audio_config::QUEUE_PAGE_SIZE)
            .await;
        Ok((songs, pages))
    }

    /// Stops the loop and leaves the voice channel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.queue.close().await;
        if let Some(handle) = self.track_handle.lock().await.take() {
            if let Err(why) = handle.stop() {
                log::warn!("AudioState::shutdown: failed to stop track: {:?}", why);
            }
        }
        *self.current_song.lock().await = None;
        if let Err(why) = self.voice.leave().await {
            log::error!("AudioState::shutdown: handler failed to leave: {:?}", why);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{song_by, wait_for, FakeChat, FakeResolver, FakeVoice};
    use std::time::Duration;

    struct Harness {
        state: Arc<AudioState>,
        voice: Arc<FakeVoice>,
        chat: Arc<FakeChat>,
        resolver: Arc<FakeResolver>,
    }

    fn harness(voice: FakeVoice) -> Harness {
        harness_with(voice, PlayerOptions::default())
    }

    fn harness_with(voice: FakeVoice, options: PlayerOptions) -> Harness {
        let voice = Arc::new(voice);
        let chat = Arc::new(FakeChat::default());
        let resolver = Arc::new(FakeResolver::default());
        let state = AudioState::new(
            voice.clone(),
            resolver.clone(),
            chat.clone(),
            Requester::new(UserId::new(99), "owner"),
            options,
        );
        Harness {
            state,
            voice,
            chat,
            resolver,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plays_queued_songs_in_order() {
        let h = harness(FakeVoice::default());
        for t in ["a", "b", "c"] {
            h.state.enqueue(song_by(t, 1)).await.unwrap();
        }
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert_eq!(h.state.now_playing().await.unwrap().title(), "a");
        assert_eq!(h.state.queue_len().await, 2);
        wait_for(|| h.chat.now_playing_titles() == vec!["a"]).await;

        h.voice.finish_current();
        wait_for(|| h.voice.played() == vec!["a", "b"]).await;
        h.voice.finish_current();
        wait_for(|| h.voice.played() == vec!["a", "b", "c"]).await;
        assert!(h.state.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn requester_skips_immediately_and_others_vote() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        h.state.enqueue(song_by("b", 1)).await.unwrap();
        h.state.enqueue(song_by("c", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;

        assert_eq!(
            h.state.skip_vote(UserId::new(1)).await.unwrap(),
            SkipOutcome::Skipped
        );
        wait_for(|| h.voice.played() == vec!["a", "b"]).await;

        assert_eq!(
            h.state.skip_vote(UserId::new(2)).await.unwrap(),
            SkipOutcome::Voted {
                votes: 1,
                required: 3
            }
        );
        assert_eq!(
            h.state.skip_vote(UserId::new(2)).await.unwrap(),
            SkipOutcome::AlreadyVoted
        );
        assert_eq!(
            h.state.skip_vote(UserId::new(3)).await.unwrap(),
            SkipOutcome::Voted {
                votes: 2,
                required: 3
            }
        );
        assert_eq!(
            h.state.skip_vote(UserId::new(4)).await.unwrap(),
            SkipOutcome::Skipped
        );
        wait_for(|| h.voice.played() == vec!["a", "b", "c"]).await;

        // votes reset for the new song
        assert_eq!(
            h.state.skip_vote(UserId::new(2)).await.unwrap(),
            SkipOutcome::Voted {
                votes: 1,
                required: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn commands_need_a_playing_track() {
        let h = harness(FakeVoice::default());
        assert!(matches!(
            h.state.skip_vote(UserId::new(1)).await,
            Err(PlayerError::NotPlaying)
        ));
        assert!(matches!(h.state.set_volume(50).await, Err(PlayerError::NotPlaying)));
        assert!(matches!(h.state.pause().await, Err(PlayerError::NotPlaying)));
        assert!(matches!(h.state.toggle_loop().await, Err(PlayerError::NotPlaying)));
        assert!(matches!(
            h.state.toggle_autoplay().await,
            Err(PlayerError::NotPlaying)
        ));
        assert!(matches!(h.state.queue_page(1).await, Err(PlayerError::EmptyQueue)));
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_bounded_and_applied() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert_eq!(h.voice.last_volume(), Some(0.08));

        assert!(matches!(
            h.state.set_volume(101).await,
            Err(PlayerError::InvalidVolume(101))
        ));
        assert!(matches!(
            h.state.set_volume(-1).await,
            Err(PlayerError::InvalidVolume(-1))
        ));
        assert_eq!(h.state.volume(), 8);

        h.state.set_volume(50).await.unwrap();
        assert_eq!(h.state.volume(), 50);
        assert_eq!(h.voice.last_volume(), Some(0.5));

        h.state.set_volume(0).await.unwrap();
        h.state.set_volume(100).await.unwrap();
        assert_eq!(h.voice.last_volume(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_reach_the_track() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        h.state.pause().await.unwrap();
        assert!(h.state.is_paused());
        assert!(h.voice.is_paused());
        h.state.resume().await.unwrap();
        assert!(!h.state.is_paused());
        assert!(!h.voice.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_replays_until_skipped() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        h.state.enqueue(song_by("b", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert!(h.state.toggle_loop().await.unwrap());

        h.voice.finish_current();
        wait_for(|| h.voice.played() == vec!["a", "a"]).await;

        h.state.skip().await.unwrap();
        wait_for(|| h.voice.played() == vec!["a", "a", "b"]).await;
        assert!(!h.state.toggle_loop().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_the_queue_and_the_track() {
        let h = harness(FakeVoice::default());
        for t in ["a", "b", "c"] {
            h.state.enqueue(song_by(t, 1)).await.unwrap();
        }
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert!(h.state.stop().await.unwrap());
        wait_for(|| h.voice.stopped() == 1).await;
        assert_eq!(h.state.queue_len().await, 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.voice.played(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_pages_and_removal() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("playing", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["playing"]).await;
        for i in 0..12 {
            h.state.enqueue(song_by(&i.to_string(), 1)).await.unwrap();
        }
        let (songs, pages) = h.state.queue_page(2).await.unwrap();
        assert_eq!(pages, 2);
        let titles: Vec<&str> = songs.iter().map(|s| s.title()).collect();
        assert_eq!(titles, vec!["10", "11"]);
        assert!(matches!(
            h.state.queue_page(3).await,
            Err(PlayerError::InvalidPage { page: 3, pages: 2 })
        ));
        assert!(matches!(
            h.state.queue_page(0).await,
            Err(PlayerError::InvalidPage { .. })
        ));

        assert_eq!(h.state.remove(1).await.unwrap().title(), "0");
        assert!(matches!(
            h.state.remove(0).await,
            Err(PlayerError::InvalidPosition(0))
        ));
        assert!(matches!(
            h.state.remove(12).await,
            Err(PlayerError::InvalidPosition(12))
        ));
        assert_eq!(h.state.queue_len().await, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_fills_silence_then_gives_up_and_leaves() {
        let h = harness(FakeVoice::finishing_immediately());

        // each default track ends at once, so the loop only waits on the queue
        tokio::time::sleep(
            audio_config::AUTOPLAY_WAIT * (audio_config::MAX_AUTOPLAY_STREAK as u32 + 1),
        )
        .await;
        wait_for(|| h.voice.played().len() == audio_config::MAX_AUTOPLAY_STREAK).await;
        assert_eq!(
            h.resolver.queries(),
            vec![
                audio_config::AUTOPLAY_TRACKS[0],
                audio_config::AUTOPLAY_TRACKS[1],
                audio_config::AUTOPLAY_TRACKS[0],
                audio_config::AUTOPLAY_TRACKS[1],
            ]
        );
        assert!(!h.state.is_autoplay());
        assert!(h.state.is_alive());

        tokio::time::sleep(audio_config::IDLE_TIMEOUT).await;
        wait_for(|| !h.state.is_alive()).await;
        assert!(h.voice.has_left());
        assert_eq!(h.voice.played().len(), audio_config::MAX_AUTOPLAY_STREAK);
        assert!(h
            .chat
            .messages()
            .iter()
            .any(|m| m.contains("leaving the voice channel")));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_song_beats_autoplay() {
        let h = harness(FakeVoice::default());
        tokio::time::sleep(audio_config::AUTOPLAY_WAIT / 2).await;
        h.state.enqueue(song_by("mine", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["mine"]).await;
        assert!(h.resolver.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_autoplay_leaves_the_channel() {
        let h = harness(FakeVoice::default());
        h.resolver.fail_with("boom");
        tokio::time::sleep(audio_config::AUTOPLAY_WAIT).await;
        wait_for(|| !h.state.is_alive()).await;
        assert!(h.voice.has_left());
        assert!(h.chat.messages().iter().any(|m| m.contains("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_without_autoplay() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert!(!h.state.toggle_autoplay().await.unwrap());
        h.voice.finish_current();

        tokio::time::sleep(audio_config::IDLE_TIMEOUT - Duration::from_secs(1)).await;
        assert!(h.state.is_alive());
        tokio::time::sleep(Duration::from_secs(2)).await;
        wait_for(|| !h.state.is_alive()).await;
        assert!(h.voice.has_left());
        assert!(h.resolver.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retired_player_refuses_songs() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert!(!h.state.toggle_autoplay().await.unwrap());
        h.voice.finish_current();

        tokio::time::sleep(audio_config::IDLE_TIMEOUT + Duration::from_secs(1)).await;
        wait_for(|| !h.state.is_alive()).await;
        assert!(matches!(
            h.state.enqueue(song_by("late", 1)).await,
            Err(PlayerError::NotConnected)
        ));
        assert_eq!(h.state.queue_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_load_stops_when_queue_is_full() {
        let h = harness_with(
            FakeVoice::default(),
            PlayerOptions {
                queue_len: 2,
                ..Default::default()
            },
        );
        h.state.enqueue(song_by("playing", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["playing"]).await;

        h.resolver.fail_on("bad");
        let entries: Vec<PlaylistEntry> = ["a", "bad", "b", "c", "d"]
            .iter()
            .map(|url| PlaylistEntry {
                title: Some(url.to_string()),
                url: url.to_string(),
            })
            .collect();
        let requester = Requester::new(UserId::new(1), "user1");
        let (queued, stopped) = h.state.enqueue_many(&entries, &requester).await;

        assert_eq!(queued, 2);
        assert!(matches!(stopped, Some(PlayerError::QueueFull(2))));
        assert_eq!(h.resolver.queries(), vec!["a", "bad", "b", "c"]);
        assert!(h.chat.messages().iter().any(|m| m.contains("`bad`")));
        let (songs, _) = h.state.queue_page(1).await.unwrap();
        let titles: Vec<&str> = songs.iter().map(|s| s.title()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_load_completes_without_errors() {
        let h = harness(FakeVoice::default());
        let entries = vec![
            PlaylistEntry {
                title: None,
                url: "x".to_owned(),
            },
            PlaylistEntry {
                title: None,
                url: "y".to_owned(),
            },
        ];
        let requester = Requester::new(UserId::new(1), "user1");
        let (queued, stopped) = h.state.enqueue_many(&entries, &requester).await;
        assert_eq!(queued, 2);
        assert!(stopped.is_none());
        wait_for(|| h.voice.played() == vec!["x"]).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reenabling_autoplay_resets_the_streak() {
        let h = harness(FakeVoice::default());
        let max = audio_config::MAX_AUTOPLAY_STREAK;
        for n in 1..=max {
            tokio::time::sleep(audio_config::AUTOPLAY_WAIT).await;
            wait_for(|| h.voice.played().len() == n).await;
            if n < max {
                h.voice.finish_current();
            }
        }

        assert!(!h.state.toggle_autoplay().await.unwrap());
        assert!(h.state.toggle_autoplay().await.unwrap());
        h.voice.finish_current();

        tokio::time::sleep(audio_config::AUTOPLAY_WAIT).await;
        wait_for(|| h.voice.played().len() == max + 1).await;
        assert!(h.state.is_autoplay());
        assert!(h.state.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_skip_keeps_looping() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        h.state.enqueue(song_by("b", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        assert!(h.state.toggle_loop().await.unwrap());

        h.voice.fail_next_stop();
        assert!(matches!(h.state.skip().await, Err(PlayerError::Voice(_))));
        h.voice.finish_current();
        wait_for(|| h.voice.played() == vec!["a", "a"]).await;
    }

    #[tokio::test(start_paused = true)]
    async fn play_failure_moves_on() {
        let h = harness(FakeVoice::default());
        h.voice.fail_next_play();
        h.state.enqueue(song_by("broken", 1)).await.unwrap();
        h.state.enqueue(song_by("ok", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["ok"]).await;
        assert!(h.chat.messages().iter().any(|m| m.starts_with("Voice error")));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let h = harness(FakeVoice::default());
        h.state.enqueue(song_by("a", 1)).await.unwrap();
        h.state.enqueue(song_by("b", 1)).await.unwrap();
        wait_for(|| h.voice.played() == vec!["a"]).await;
        h.state.shutdown().await;
        assert!(!h.state.is_alive());
        assert!(h.voice.has_left());
        assert!(!h.state.is_playing().await);
        tokio::time::sleep(audio_config::IDLE_TIMEOUT * 2).await;
        assert_eq!(h.voice.played(), vec!["a"]);
    }
}
