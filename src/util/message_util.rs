use poise::serenity_prelude::{ChannelId, CreateEmbed, CreateMessage, Http, ReactionType};

use crate::{audio::config::chat::EMBED_COLOUR, PoiseContext};

pub fn get_styled_embed(text: &str) -> CreateEmbed {
    CreateEmbed::new().colour(EMBED_COLOUR).description(text)
}

pub async fn send_embed(http: &Http, channel_id: ChannelId, text: &str) -> anyhow::Result<()> {
    channel_id
        .send_message(http, CreateMessage::new().add_embed(get_styled_embed(text)))
        .await?;
    Ok(())
}

/// Reacts to the invoking message; slash commands have none, so the emoji
/// is sent as the reply instead.
pub async fn react(ctx: PoiseContext<'_>, emoji: char) -> anyhow::Result<()> {
    match ctx {
        poise::Context::Prefix(prefix) => {
            prefix
                .msg
                .react(ctx.http(), ReactionType::Unicode(emoji.to_string()))
                .await?;
        }
        poise::Context::Application(_) => {
            ctx.say(emoji.to_string()).await?;
        }
    }
    Ok(())
}
