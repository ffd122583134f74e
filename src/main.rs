use audio::{audio_state::AudioState, config::Settings, YtDlp};
use serenity::all::ClientBuilder;
use songbird::SerenityInit;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use util::send_embed;

mod audio;
mod logger;
mod util;

use poise::{
    serenity_prelude::{CacheHttp, FullEvent, GatewayIntents, GuildId},
    Context as RawPoiseContext,
};

type Error = Box<dyn std::error::Error + Send + Sync>;
type PoiseContext<'a> = RawPoiseContext<'a, Data, Error>;

pub struct Data {
    pub audio_states: Mutex<HashMap<GuildId, Arc<AudioState>>>,
    pub settings: Settings,
    pub resolver: Arc<YtDlp>,
    pub http_client: reqwest::Client,
    pub ytdlp: &'static str,
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            log::warn!("command {} failed: {}", ctx.command().name, error);
            if let Err(e) = send_embed(
                ctx.serenity_context().http(),
                ctx.channel_id(),
                &error.to_string(),
            )
            .await
            {
                log::error!("Error while sending error embed: {}", e)
            };
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                log::error!("Error while handling error: {}", e)
            }
        }
    }
}

async fn on_event(
    _ctx: &serenity::all::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    _data: &Data,
) -> Result<(), Error> {
    if let FullEvent::Ready { data_about_bot } = event {
        log::info!(
            "logged in as {} ({})",
            data_about_bot.user.name,
            data_about_bot.user.id
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init_logger()?;
    let settings = Settings::from_env()?;

    let mut commands = vec![];
    audio::add_group(&mut commands);
    let options = poise::FrameworkOptions {
        commands,
        on_error: |error| Box::pin(on_error(error)),
        event_handler: |ctx, event, framework, data| {
            Box::pin(on_event(ctx, event, framework, data))
        },
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some(settings.prefix.clone()),
            mention_as_prefix: false,

            ..Default::default()
        },
        ..Default::default()
    };

    // songbird's ytdl input wants a program name that outlives every track
    let ytdlp: &'static str = Box::leak(settings.ytdlp_path.clone().into_boxed_str());
    let token = settings.token.clone();
    let framework = poise::Framework::builder()
        .options(options)
        .setup(move |ctx, _, framework| {
            Box::pin(async move {
                if settings.guilds.is_empty() {
                    poise::builtins::register_globally(ctx, &framework.options().commands)
                        .await?;
                } else {
                    for guild_id in &settings.guilds {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        )
                        .await?;
                    }
                }
                Ok(Data {
                    audio_states: Mutex::new(HashMap::new()),
                    resolver: Arc::new(YtDlp::new(ytdlp)),
                    http_client: reqwest::Client::new(),
                    ytdlp,
                    settings,
                })
            })
        })
        .build();

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS;
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    let mut client = ClientBuilder::new(token, intents)
        .framework(framework)
        .register_songbird()
        .await?;

    client.start().await?;
    Ok(())
}
