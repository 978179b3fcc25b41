//! # Command Dispatch
//!
//! Turns a prefix-stripped line into a reply: tokenise, look the keyword up,
//! apply the permission gate, run the handler. All dispatch runs under one
//! lock so alias mutations and their saves never interleave.
//!
//! Error policy: unknown keywords stay silent in the channel (they are only
//! logged); every other failure is answered with [`BotError::reply_text`].

use anyhow::Result;
use log::{error, info, warn};
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::ChannelId;
use serenity::prelude::Context;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::aliases::{AliasStore, ContentProbe};
use crate::commands::{
    CommandContext, CommandKind, CommandRegistry, Embed, Endpoints, RegistryState, Reply,
    EMBED_TOTAL_LIMIT,
};
use crate::config::ConfigHandle;
use crate::error::BotError;
use crate::permissions::{self, Caller, DiscordRoleDirectory, RoleDirectory};

/// Discord accepts at most this many embeds per message.
const EMBEDS_PER_MESSAGE: usize = 10;

/// State shared by every dispatch. Only `shared` is mutable.
pub struct BotState {
    pub shared: Mutex<RegistryState>,
    pub probe: Arc<dyn ContentProbe>,
    pub http: reqwest::Client,
    pub endpoints: Endpoints,
    pub started_at: Instant,
}

impl BotState {
    pub fn new(
        registry: CommandRegistry,
        aliases: AliasStore,
        probe: Arc<dyn ContentProbe>,
        http: reqwest::Client,
    ) -> Self {
        BotState {
            shared: Mutex::new(RegistryState { registry, aliases }),
            probe,
            http,
            endpoints: Endpoints::default(),
            started_at: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<BotState>,
    config: ConfigHandle,
}

impl CommandHandler {
    pub fn new(state: BotState, config: ConfigHandle) -> Self {
        CommandHandler {
            state: Arc::new(state),
            config,
        }
    }

    /// Runs one command line. `Ok(None)` means the line was empty.
    ///
    /// The registry lock is held only for the lookup and by the handlers that
    /// touch aliases, so the role lookup and slow upstream calls never block
    /// other commands.
    pub async fn dispatch(
        &self,
        caller: &Caller,
        line: &str,
        directory: &dyn RoleDirectory,
    ) -> Result<Option<Reply>, BotError> {
        let args: Vec<String> = line.split_whitespace().map(String::from).collect();
        let Some(first) = args.first() else {
            return Ok(None);
        };
        let keyword = first.to_lowercase();

        let config = self.config.current();
        let descriptor = self
            .state
            .shared
            .lock()
            .await
            .registry
            .get(&keyword)
            .cloned()
            .ok_or_else(|| BotError::UnknownCommand(keyword.clone()))?;

        if !permissions::is_allowed(caller, &keyword, &config.permissions, directory).await {
            return Err(BotError::PermissionDenied {
                caller: caller.name.clone(),
                keyword,
            });
        }

        let reply = match descriptor.kind {
            CommandKind::Alias(entry) => Reply::Text(entry.value),
            CommandKind::Builtin(command) => {
                let ctx = CommandContext {
                    state: &self.state.shared,
                    probe: &*self.state.probe,
                    http: &self.state.http,
                    endpoints: &self.state.endpoints,
                    config: &config,
                    started_at: self.state.started_at,
                };
                command.run(&ctx, &args).await?
            }
        };
        Ok(Some(reply))
    }

/// Serenity entry point for a prefix-stripped message.
    pub async fn handle_message(&self, ctx: &Context, msg: &Message, line: &str) -> Result<()> {
        let config = self.config.current();
        let caller = Caller {
            user_id: msg.author.id.0,
            guild_id: msg.guild_id.map(|g| g.0).or_else(|| config.guild_id()),
            name: msg.author.tag(),
        };
        let directory = DiscordRoleDirectory::new(ctx.http.clone());

        match self.dispatch(&caller, line, &directory).await {
            Ok(Some(reply)) => send_reply(&ctx.http, msg.channel_id, &reply).await?,
            Ok(None) => {}
            Err(e) => {
                match &e {
                    BotError::UnknownCommand(_) => info!("{}", e),
                    BotError::PermissionDenied { .. } => warn!("{}", e),
                    _ => error!("Failed to execute command {:?}: {}", line, e),
                }
                if let Some(text) = e.reply_text() {
                    msg.channel_id.say(&ctx.http, text).await?;
                }
            }
        }
        Ok(())
    }
}

/// Delivers a reply to `channel_id`. Pages are sent as embeds, batched by
/// [`batch_embeds`].
pub async fn send_reply(http: &Arc<Http>, channel_id: ChannelId, reply: &Reply) -> Result<()> {
    match reply {
        Reply::Text(text) => {
            channel_id.say(http, text).await?;
        }
        Reply::Embed(embed) => {
            channel_id
                .send_message(http, |m| m.embed(|e| build_embed(e, embed)))
                .await?;
        }
        Reply::Pages(pages) => {
            for chunk in batch_embeds(pages) {
                channel_id
                    .send_message(http, |m| {
                        for page in chunk {
                            m.add_embed(|e| build_embed(e, page));
                        }
                        m
                    })
                    .await?;
            }
        }
    }
    Ok(())
}

/// Groups consecutive embeds into messages that stay within Discord's
/// per-message embed count and combined text budget.
pub fn batch_embeds(embeds: &[Embed]) -> Vec<&[Embed]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (i, embed) in embeds.iter().enumerate() {
        let len = embed.text_len();
        let full = i - start == EMBEDS_PER_MESSAGE || chars + len > EMBED_TOTAL_LIMIT;
        if i > start && full {
            batches.push(&embeds[start..i]);
            start = i;
            chars = 0;
        }
        chars += len;
    }
    if start < embeds.len() {
        batches.push(&embeds[start..]);
    }
    batches
}

fn build_embed<'a>(e: &'a mut CreateEmbed, embed: &Embed) -> &'a mut CreateEmbed {
    e.colour(embed.colour);
    if let Some(title) = &embed.title {
        e.title(title);
    }
    if let Some(description) = &embed.description {
        e.description(description);
    }
    if let Some(image) = &embed.image {
        e.image(image);
    }
    for field in &embed.fields {
        e.field(&field.name, &field.value, field.inline);
    }
    e
}
