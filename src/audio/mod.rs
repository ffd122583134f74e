pub mod audio_state;
pub mod commands;
pub mod config;

mod chat;
mod song;
mod song_queue;
mod types;
mod voice;
mod ytdl;

#[cfg(test)]
mod testing;

pub use commands::*;
pub use ytdl::YtDlp;
