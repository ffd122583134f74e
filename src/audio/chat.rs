use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, CreateEmbed, CreateMessage, Http, Mentionable};
use std::sync::Arc;

use super::song::Song;
use crate::util::{get_styled_embed, send_embed};

/// Where the playback loop posts its announcements.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    async fn say(&self, text: &str) -> anyhow::Result<()>;
    async fn now_playing(&self, song: &Song) -> anyhow::Result<()>;
}

pub struct SerenityChat {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl SerenityChat {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> SerenityChat {
        SerenityChat { http, channel_id }
    }
}

#[async_trait]
impl ChatChannel for SerenityChat {
    async fn say(&self, text: &str) -> anyhow::Result<()> {
        send_embed(&self.http, self.channel_id, text).await
    }

    async fn now_playing(&self, song: &Song) -> anyhow::Result<()> {
        self.channel_id
            .send_message(&self.http, CreateMessage::new().add_embed(song_embed(song)))
            .await?;
        Ok(())
    }
}

pub fn song_embed(song: &Song) -> CreateEmbed {
    let metadata = song.metadata();
    let uploader = match &metadata.uploader_url {
        Some(url) => format!("[{}]({})", song.uploader(), url),
        None => song.uploader().to_owned(),
    };
    let mut embed = get_styled_embed(&format!("```css\n{}\n```", song.title()))
        .title("Now playing")
        .field("Duration", song.duration_string(), true)
        .field("Requested by", song.requester().id.mention().to_string(), true)
        .field("Uploader", uploader, true);
    if let Some(url) = song.url() {
        embed = embed.field("URL", format!("[Click]({})", url), true);
    }
    if let Some(views) = metadata.view_count {
        embed = embed.field("Views", views.to_string(), true);
    }
    if let Some(likes) = metadata.like_count {
        embed = embed.field("Likes", likes.to_string(), true);
    }
    if let Some(date) = song.upload_date_string() {
        embed = embed.field("Uploaded", date, true);
    }
    if let Some(thumbnail) = &metadata.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    embed
}
