use super::{
    song::Song,
    types::{PlayerError, PlayerResult},
};
use rand::seq::SliceRandom;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Mutex, Semaphore};

/// Bounded FIFO shared between command handlers and the playback loop.
///
/// Each queued song is backed by one semaphore permit. Removing songs
/// outside of `pop` reclaims permits where it can; any permit left over is
/// discarded by `pop` when it finds the queue empty.
///
/// A closed queue belongs to a player that left its channel and refuses
/// every further song. `closed` only changes while the queue lock is held.
pub struct SongQueue {
    queue: Mutex<VecDeque<Song>>,
    queue_sem: Semaphore,
    capacity: usize,
    closed: AtomicBool,
}

impl SongQueue {
    pub fn new(capacity: usize) -> SongQueue {
        SongQueue {
            queue: Mutex::new(VecDeque::new()),
            queue_sem: Semaphore::new(0),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn push(&self, song: Song) -> PlayerResult<()> {
        let mut queue = self.queue.lock().await;
        if self.is_closed() {
            return Err(PlayerError::NotConnected);
        }
        if queue.len() >= self.capacity {
            return Err(PlayerError::QueueFull(self.capacity));
        }
        queue.push_back(song);
        drop(queue);
        self.queue_sem.add_permits(1);
        Ok(())
    }

    /// Waits for the next song. Safe to cancel: a song is only taken once
    /// its permit is consumed under the queue lock.
    pub async fn pop(&self) -> Option<Song> {
        loop {
            let permit = self.queue_sem.acquire().await.ok()?;
            let mut queue = self.queue.lock().await;
            permit.forget();
            if let Some(song) = queue.pop_front() {
                return Some(song);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    pub async fn shuffle(&self) -> PlayerResult<()> {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        queue.make_contiguous().shuffle(&mut rand::thread_rng());
        Ok(())
    }

    /// Removes the song at a 0-based index.
    pub async fn remove(&self, index: usize) -> PlayerResult<Song> {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        let song = queue
            .remove(index)
            .ok_or(PlayerError::InvalidPosition(index + 1))?;
        self.reclaim_permits(1);
        Ok(song)
    }

    /// Returns the number of songs dropped.
    pub async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let count = queue.len();
        queue.clear();
        self.reclaim_permits(count);
        count
    }

    /// Drops every song and refuses new ones from now on.
    pub async fn close(&self) -> usize {
        let mut queue = self.queue.lock().await;
        self.closed.store(true, Ordering::Release);
        let count = queue.len();
        queue.clear();
        self.reclaim_permits(count);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn page(&self, start: usize, count: usize) -> Vec<Song> {
        let queue = self.queue.lock().await;
        queue.iter().skip(start).take(count).cloned().collect()
    }

    fn reclaim_permits(&self, count: usize) {
        for _ in 0..count {
            match self.queue_sem.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }
    }
}
