use poise::serenity_prelude::UserId;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Requester {
            id,
            name: name.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped,
    Voted { votes: usize, required: usize },
    AlreadyVoted,
}

/// Failures that are reported back to the guild as a chat reply.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("I'm not connected to any voice channel.")]
    NotConnected,
    #[error("You are not connected to any voice channel.")]
    AuthorNotInVoice,
    #[error("You are not connected to a voice channel and no channel was given.")]
    NoDestination,
    #[error("I'm already in another voice channel.")]
    AlreadyConnected,
    #[error("Nothing is playing right now.")]
    NotPlaying,
    #[error("The queue is empty.")]
    EmptyQueue,
    #[error("The queue is full ({0} songs).")]
    QueueFull(usize),
    #[error("Volume must be between 0 and 100, got {0}.")]
    InvalidVolume(i64),
    #[error("There is no song at position {0}.")]
    InvalidPosition(usize),
    #[error("There is no page {page}, pick one between 1 and {pages}.")]
    InvalidPage { page: usize, pages: usize },
    #[error("Couldn't find anything that matches `{0}`")]
    NoMatches(String),
    #[error("Couldn't fetch `{0}`")]
    FetchFailed(String),
    #[error("Couldn't retrieve any matches for `{0}`")]
    NoEntries(String),
    #[error("An error occurred while processing this request: {0}")]
    Extractor(String),
    #[error("Voice error: {0}")]
    Voice(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
