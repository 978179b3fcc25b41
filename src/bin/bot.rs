use anyhow::{anyhow, Context as _, Result};
use log::{error, info};
use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::{Activity, Ready};
use serenity::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use netsocbot::aliases::{AliasStore, HttpContentProbe};
use netsocbot::command_handler::{BotState, CommandHandler};
use netsocbot::commands::builtin_registry;
use netsocbot::config::{Config, ConfigHandle};
use netsocbot::config_watcher::ConfigWatcher;
use netsocbot::http_server::{start_http_server, AppState, DiscordSink};

const CONFIG_RELOAD_PERIOD: Duration = Duration::from_secs(5);

struct Handler {
    command_handler: CommandHandler,
    config: ConfigHandle,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let config = self.config.current();
        let Some(line) = msg.content.strip_prefix(config.prefix.as_str()) else {
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        info!("Received command {:?} from {}", line, msg.author.tag());

        if let Err(e) = self.command_handler.handle_message(&ctx, &msg, line).await {
            error!("Error handling message: {:#}", e);
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected and ready!", ready.user.name);
        info!("Connected to {} guilds", ready.guilds.len());

        let prefix = self.config.current().prefix.clone();
        ctx.set_activity(Activity::playing(format!("{}help", prefix))).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::load(&config_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if config.token.is_empty() {
        return Err(anyhow!(
            "No bot token configured, set \"token\" in {} or DISCORD_TOKEN",
            config_path
        ));
    }

    info!("Starting bot...");

    let mut registry = builtin_registry();
    let mut aliases = AliasStore::new(&config.alias_path);
    aliases
        .load(&mut registry)
        .context("Refusing to start with an unreadable alias file")?;

    let http = reqwest::Client::new();
    let state = BotState::new(
        registry,
        aliases,
        Arc::new(HttpContentProbe::new(http.clone())),
        http,
    );

    let token = config.token.clone();
    let host_name = config.bot_host_name.clone();
    let config = ConfigHandle::new(config);
    let handler = Handler {
        command_handler: CommandHandler::new(state, config.clone()),
        config: config.clone(),
    };

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| {
            error!("Failed to create Discord client: {}", e);
            anyhow!("Client creation failed: {}", e)
        })?;

    let app_state = AppState {
        sink: Arc::new(DiscordSink::new(client.cache_and_http.http.clone())),
        config: config.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = start_http_server(app_state, &host_name).await {
            error!("HTTP server stopped: {:#}", e);
        }
    });

    tokio::spawn(ConfigWatcher::new(config_path, config).run(CONFIG_RELOAD_PERIOD));

    info!("Bot configured successfully. Connecting to Discord gateway...");

    if let Err(why) = client.start().await {
        error!("Gateway connection failed: {:?}", why);
        return Err(anyhow!("Failed to establish gateway connection: {}", why));
    }

    Ok(())
}
