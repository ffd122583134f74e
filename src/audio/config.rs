use anyhow::{anyhow, Context};
use poise::serenity_prelude::GuildId;

pub mod audio {
    use std::time::Duration;

    pub const BOT_PREFIX: &str = "!";

    pub const AUTOPLAY_WAIT: Duration = Duration::from_secs(10);
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
    pub const MAX_AUTOPLAY_STREAK: usize = 4;

    pub const DEFAULT_VOLUME: u8 = 8;
    pub const MAX_VOLUME: u8 = 100;

    pub const SKIP_QUORUM: usize = 3;

    pub const MAX_QUEUE_LEN: usize = 500;
    pub const QUEUE_PAGE_SIZE: usize = 10;

    pub const AUTOPLAY_TRACKS: [&str; 2] = [
        "https://www.youtube.com/watch?v=N1BcpzPGlYQ",
        "https://www.youtube.com/watch?v=uRSvcUozBOc",
    ];
}

pub mod chat {
    pub const EMBED_COLOUR: u32 = 0xf542bf;
    pub const PURGE_LIMIT: u8 = 5;
}

pub mod ytdl {
    pub const DEFAULT_BINARY: &str = "yt-dlp";
    pub const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub token: String,
    pub prefix: String,
    pub guilds: Vec<GuildId>,
    pub autoplay_tracks: Vec<String>,
    pub ytdlp_path: String,
}

impl Settings {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> anyhow::Result<Settings> {
        if let Err(why) = dotenvy::dotenv() {
            log::debug!("no .env loaded: {}", why);
        }
        Settings::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("DISCORD_BOT_TOKEN is not set")?;

        let prefix = lookup("BOT_PREFIX")
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| audio::BOT_PREFIX.to_owned());

        let guilds = match lookup("BOT_GUILDS") {
            Some(guilds) => parse_guilds(&guilds)?,
            None => vec![],
        };

        let autoplay_tracks = lookup("AUTOPLAY_TRACKS")
            .map(|tracks| split_list(&tracks))
            .filter(|tracks| !tracks.is_empty())
            .unwrap_or_else(|| {
                audio::AUTOPLAY_TRACKS
                    .iter()
                    .map(|t| t.to_string())
                    .collect()
            });

        let ytdlp_path = lookup("YTDLP_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| ytdl::DEFAULT_BINARY.to_owned());

        Ok(Settings {
            token,
            prefix,
            guilds,
            autoplay_tracks,
            ytdlp_path,
        })
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_guilds(s: &str) -> anyhow::Result<Vec<GuildId>> {
    split_list(s)
        .into_iter()
        .map(|g| {
            let id: u64 = g
                .parse()
                .map_err(|_| anyhow!("invalid guild id in BOT_GUILDS: {}", g))?;
            if id == 0 {
                return Err(anyhow!("invalid guild id in BOT_GUILDS: {}", g));
            }
            Ok(GuildId::new(id))
        })
        .collect()
}
