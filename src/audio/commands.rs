use super::{
    audio_state::{AudioState, PlayerOptions},
    chat::{song_embed, ChatChannel, SerenityChat},
    config::{audio as audio_config, chat as chat_config},
    types::{PlayerError, Requester, SkipOutcome},
    voice::SongbirdVoice,
    ytdl::{is_playlist_url, SongResolver},
};
use anyhow::Context;
use poise::{
    serenity_prelude::{
        ChannelId, ChannelType, CreateEmbedFooter, GetMessages, GuildChannel, MessageId, UserId,
    },
    Command, CreateReply,
};
use std::sync::Arc;

use crate::{
    util::{get_styled_embed, react},
    Data, Error, PoiseContext,
};

async fn reply(ctx: &PoiseContext<'_>, text: &str) -> Result<(), Error> {
    ctx.send(CreateReply::default().embed(get_styled_embed(text)))
        .await?;
    Ok(())
}

fn chat_for(ctx: &PoiseContext<'_>) -> Arc<dyn ChatChannel> {
    Arc::new(SerenityChat::new(
        ctx.serenity_context().http.clone(),
        ctx.channel_id(),
    ))
}

fn voice_channel_of(ctx: &PoiseContext<'_>, user_id: UserId) -> anyhow::Result<Option<ChannelId>> {
    let guild = ctx.guild().context("failed to get guild")?;
    Ok(guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id))
}

/// The author's voice channel, as long as the bot is not busy elsewhere.
fn ensure_voice_state(ctx: &PoiseContext<'_>) -> Result<ChannelId, Error> {
    let author_channel =
        voice_channel_of(ctx, ctx.author().id)?.ok_or(PlayerError::AuthorNotInVoice)?;
    let bot_id = ctx.cache().current_user().id;
    if let Some(bot_channel) = voice_channel_of(ctx, bot_id)? {
        if bot_channel != author_channel {
            return Err(PlayerError::AlreadyConnected.into());
        }
    }
    Ok(author_channel)
}

/// Returns the live player of this guild, pointing its announcements at the
/// invoking channel.
async fn get_audio_state(ctx: &PoiseContext<'_>) -> Result<Arc<AudioState>, Error> {
    let guild_id = ctx.guild_id().context("failed to get guild id")?;
    let state = {
        let audio_states = ctx.data().audio_states.lock().await;
        audio_states
            .get(&guild_id)
            .filter(|state| state.is_alive())
            .cloned()
    };
    match state {
        Some(state) => {
            state.set_chat(chat_for(ctx)).await;
            Ok(state)
        }
        None => Err(PlayerError::NotConnected.into()),
    }
}

/// Joins (or moves to) `channel_id` and returns the guild's player, creating
/// a fresh one if the previous player retired.
async fn connect(ctx: &PoiseContext<'_>, channel_id: ChannelId) -> Result<Arc<AudioState>, Error> {
    let guild_id = ctx.guild_id().context("failed to get guild id")?;
    let manager = songbird::get(ctx.serenity_context())
        .await
        .context("songbird voice client is not registered")?;
    let handler = manager
        .join(guild_id, channel_id)
        .await
        .map_err(|e| PlayerError::Voice(e.to_string()))?;

    let data = ctx.data();
    let mut audio_states = data.audio_states.lock().await;
    if let Some(state) = audio_states.get(&guild_id).filter(|s| s.is_alive()) {
        state.set_chat(chat_for(ctx)).await;
        return Ok(state.clone());
    }

    log::info!("starting player for guild {} in channel {}", guild_id, channel_id);
    let voice = SongbirdVoice::new(
        manager,
        guild_id,
        handler,
        data.http_client.clone(),
        data.ytdlp,
    );
    let audio_state = AudioState::new(
        Arc::new(voice),
        data.resolver.clone(),
        chat_for(ctx),
        Requester::new(ctx.author().id, ctx.author().name.clone()),
        PlayerOptions {
            autoplay_tracks: data.settings.autoplay_tracks.clone(),
            ..Default::default()
        },
    );
    audio_states.insert(guild_id, audio_state.clone());
    Ok(audio_state)
}

/// Joins your voice channel
#[poise::command(prefix_command, slash_command, guild_only)]
async fn join(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let channel_id = ensure_voice_state(&ctx)?;
    connect(&ctx, channel_id).await?;
    reply(&ctx, &format!("Joined <#{}>", channel_id)).await
}

/// Summons the bot to a voice channel, or to yours if none is given
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
async fn summon(
    ctx: PoiseContext<'_>,
    #[description = "voice channel to join"] channel: Option<GuildChannel>,
) -> Result<(), Error> {
    let channel_id = match channel {
        Some(channel) if matches!(channel.kind, ChannelType::Voice | ChannelType::Stage) => {
            channel.id
        }
        Some(channel) => {
            return Err(anyhow::anyhow!("<#{}> is not a voice channel", channel.id).into())
        }
        None => voice_channel_of(&ctx, ctx.author().id)?.ok_or(PlayerError::NoDestination)?,
    };
    connect(&ctx, channel_id).await?;
    reply(&ctx, &format!("Joined <#{}>", channel_id)).await
}

/// Clears the queue and leaves the voice channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("disconnect"),
    required_permissions = "MANAGE_GUILD"
)]
async fn leave(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().context("failed to get guild id")?;
    let state = ctx
        .data()
        .audio_states
        .lock()
        .await
        .remove(&guild_id)
        .ok_or(PlayerError::NotConnected)?;
    state.shutdown().await;
    reply(&ctx, "Disconnected").await
}

/// Plays a song or playlist; URLs are used as is, anything else is searched
#[poise::command(prefix_command, slash_command, guild_only)]
async fn play(
    ctx: PoiseContext<'_>,
    #[rest]
    #[description = "song/playlist URL or search query"]
    query: String,
) -> Result<(), Error> {
    let audio_state = match get_audio_state(&ctx).await {
        Ok(state) => {
            ensure_voice_state(&ctx)?;
            state
        }
        Err(_) => {
            let channel_id = ensure_voice_state(&ctx)?;
            connect(&ctx, channel_id).await?
        }
    };
    ctx.defer_or_broadcast().await?;

    let resolver = ctx.data().resolver.clone();
    let requester = Requester::new(ctx.author().id, ctx.author().name.clone());

    if !is_playlist_url(&query) {
        let song = resolver.resolve(&query, &requester).await?;
        let text = format!("Enqueued {}", song);
        match audio_state.enqueue(song.clone()).await {
            // the player left while the song was being looked up
            Err(PlayerError::NotConnected) => {
                let channel_id = ensure_voice_state(&ctx)?;
                connect(&ctx, channel_id).await?.enqueue(song).await?;
            }
            result => result?,
        }
        return reply(&ctx, &text).await;
    }

    reply(&ctx, "Loading playlist...").await?;
    let playlist = resolver.playlist(&query).await?;
    let (queued, stopped) = audio_state
        .enqueue_many(&playlist.entries, &requester)
        .await;
    if let Some(why) = stopped {
        reply(&ctx, &why.to_string()).await?;
    }
    reply(
        &ctx,
        &format!("`{}` songs queued from **{}**", queued, playlist.title),
    )
    .await
}

/// Shows the song that is playing
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("current", "playing")
)]
async fn now(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    let song = audio_state
        .now_playing()
        .await
        .ok_or(PlayerError::NotPlaying)?;
    ctx.send(CreateReply::default().embed(song_embed(&song)))
        .await?;
    Ok(())
}

/// Pauses the song that is playing
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
async fn pause(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    if audio_state.is_paused() {
        return reply(&ctx, "The song is already paused.").await;
    }
    audio_state.pause().await?;
    react(ctx, '⏯').await?;
    Ok(())
}

/// Resumes a paused song
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
async fn resume(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    audio_state.resume().await?;
    react(ctx, '⏯').await?;
    Ok(())
}

/// Stops playing and clears the queue
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
async fn stop(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    if audio_state.stop().await? {
        react(ctx, '⏹').await?;
    } else {
        reply(&ctx, "Queue cleared").await?;
    }
    Ok(())
}

/// Votes to skip the song; the requester skips right away
#[poise::command(prefix_command, slash_command, guild_only)]
async fn skip(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    match audio_state.skip_vote(ctx.author().id).await? {
        SkipOutcome::Skipped => react(ctx, '⏭').await?,
        SkipOutcome::Voted { votes, required } => {
            reply(
                &ctx,
                &format!("Skip vote added, currently at **{}/{}**", votes, required),
            )
            .await?
        }
        SkipOutcome::AlreadyVoted => {
            reply(&ctx, "You have already voted to skip this song.").await?
        }
    }
    Ok(())
}

/// Shows the queue, 10 songs per page
#[poise::command(prefix_command, slash_command, guild_only)]
async fn queue(
    ctx: PoiseContext<'_>,
    #[description = "page to show"] page: Option<u32>,
) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    let page = page.unwrap_or(1) as usize;
    let (songs, pages) = audio_state.queue_page(page).await?;

    let start = (page - 1) * audio_config::QUEUE_PAGE_SIZE;
    let mut text = format!("**{} tracks:**\n\n", audio_state.queue_len().await);
    for (i, song) in songs.iter().enumerate() {
        text += &format!(
            "`{}.` [**{}**]({})\n",
            start + i + 1,
            song.title(),
            song.url().unwrap_or_default()
        );
    }
    let embed = get_styled_embed(&text)
        .footer(CreateEmbedFooter::new(format!("Viewing page {}/{}", page, pages)));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Shuffles the queue
#[poise::command(prefix_command, slash_command, guild_only)]
async fn shuffle(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    audio_state.shuffle().await?;
    react(ctx, '✅').await?;
    Ok(())
}

/// Removes the song at the given queue position
#[poise::command(prefix_command, slash_command, guild_only)]
async fn remove(
    ctx: PoiseContext<'_>,
    #[description = "queue position, starting at 1"] index: u32,
) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    audio_state.remove(index as usize).await?;
    react(ctx, '✅').await?;
    Ok(())
}

/// Sets the player volume (0-100)
#[poise::command(prefix_command, slash_command, guild_only)]
async fn volume(
    ctx: PoiseContext<'_>,
    #[description = "volume between 0 and 100"] volume: i64,
) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    audio_state.set_volume(volume).await?;
    reply(&ctx, &format!("Volume set to {}%", volume)).await
}

/// Loops the current song; run again to stop looping
#[poise::command(prefix_command, slash_command, guild_only, rename = "loop")]
async fn looping(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    audio_state.toggle_loop().await?;
    react(ctx, '✅').await?;
    Ok(())
}

/// Toggles autoplay of default songs once the queue runs dry
#[poise::command(prefix_command, slash_command, guild_only)]
async fn autoplay(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let audio_state = get_audio_state(&ctx).await?;
    let enabled = audio_state.toggle_autoplay().await?;
    react(ctx, '✅').await?;
    reply(
        &ctx,
        &format!(
            "Autoplay after the queue ends is now {}.",
            if enabled { "on" } else { "off" }
        ),
    )
    .await
}

/// Deletes the latest messages in this channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_bot_permissions = "MANAGE_MESSAGES"
)]
async fn clear(ctx: PoiseContext<'_>) -> Result<(), Error> {
    let channel_id = ctx.channel_id();
    let messages = channel_id
        .messages(
            ctx.http(),
            GetMessages::new().limit(chat_config::PURGE_LIMIT),
        )
        .await?;
    let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
    match ids.as_slice() {
        [] => {}
        [id] => channel_id.delete_message(ctx.http(), *id).await?,
        _ => channel_id.delete_messages(ctx.http(), ids).await?,
    }
    reply(&ctx, "Cleared messages").await
}

pub fn add_group(commands: &mut Vec<Command<Data, Error>>) {
    commands.extend(vec![
        join(),
        summon(),
        leave(),
        play(),
        now(),
        pause(),
        resume(),
        stop(),
        skip(),
        queue(),
        shuffle(),
        remove(),
        volume(),
        looping(),
        autoplay(),
        clear(),
    ])
}
