//! Built-in commands: ping, help, alias, unalias, info, config, inspire,
//! minecraft, top, sensors

use serde::Deserialize;
use serenity::async_trait;
use std::io;
use std::time::Duration;
use tokio::process::Command as Process;

use super::{
    Command, CommandContext, CommandDescriptor, CommandRegistry, Embed, RegistryState, Reply,
    FIELD_VALUE_LIMIT, MESSAGE_LIMIT,
};
use crate::aliases::{AliasKind, AliasStore};
use crate::error::BotError;

/// Keyword of the command listing and describing the others.
pub const HELP_COMMAND: &str = "help";

pub const QUOTE_API_URL: &str = "http://api.forismatic.com/api/1.0/";
pub const MINECRAFT_API_URL: &str = "http://minecraft.netsoc.co/standalone/dynmap_NetsocCraft.json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PROCESS_TIMEOUT: Duration = Duration::from_secs(10);
const EMBED_TITLE_LIMIT: usize = 256;

/// Registry holding every built-in command and no aliases.
pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(
        "ping",
        CommandDescriptor::builtin("Responds 'Pong!' to a 'ping'.", Ping),
    );
    registry.register(
        HELP_COMMAND,
        CommandDescriptor::builtin(
            "If followed by a command name, it shows the details of the command",
            Help,
        ),
    );
    registry.register(
        "alias",
        CommandDescriptor::builtin(
            "Sets a shortcut command. Usage: alias <keyword> <value>. Without arguments lists every alias",
            SetAlias,
        ),
    );
    registry.register(
        "unalias",
        CommandDescriptor::builtin("Removes a shortcut command. Usage: unalias <keyword>", UnsetAlias),
    );
    registry.register(
        "info",
        CommandDescriptor::builtin("Displays some info about the bot", Info),
    );
    registry.register(
        "config",
        CommandDescriptor::builtin("Displays the config for the bot", ShowConfig),
    );
    registry.register(
        "inspire",
        CommandDescriptor::builtin("Gives an inspirational quote", Inspire),
    );
    registry.register(
        "minecraft",
        CommandDescriptor::builtin("Lists the players on the Minecraft server", Minecraft),
    );
    registry.register(
        "top",
        CommandDescriptor::builtin(
            "Prints the output of `top -b -n 1`",
            SystemReport::new("top", &["-b", "-n", "1"]),
        ),
    );
    registry.register(
        "sensors",
        CommandDescriptor::builtin(
            "Displays temperature of the server",
            SystemReport::new("sensors", &[]),
        ),
    );
    registry
}

pub struct Ping;

#[async_trait]
impl Command for Ping {
    async fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        Ok(Reply::text("Pong!"))
    }
}

/// Lists the built-in commands, or describes the one named in `args[1]`.
pub struct Help;

#[async_trait]
impl Command for Help {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<Reply, BotError> {
        let state = ctx.state.lock().await;
        match args {
            [_, target] => {
                let keyword = target.to_lowercase();
                let descriptor = state
                    .registry
                    .get(&keyword)
                    .ok_or_else(|| BotError::not_found("Command", keyword.clone()))?;
                Ok(Reply::Embed(Embed::new().field(
                    truncate_chars(&keyword, EMBED_TITLE_LIMIT),
                    truncate_chars(&descriptor.help, FIELD_VALUE_LIMIT),
                    false,
                )))
            }
            [_] | [] => {
                let mut embed = Embed::new().title("Commands");
                for (keyword, descriptor) in state.registry.builtins() {
                    embed = embed.field(keyword, &descriptor.help, false);
                }

                let aliases = state.registry.alias_count();
                if aliases > 0 {
                    embed = embed.description(format!(
                        "{} aliases are also set, use `{}alias` to list them",
                        aliases, ctx.config.prefix
                    ));
                }
                Ok(Reply::Embed(embed))
            }
            _ => Err(BotError::Usage(format!(
                "Usage: {}{} [command]",
                ctx.config.prefix, HELP_COMMAND
            ))),
        }
    }
}

/// `alias` lists, `alias <keyword> <value...>` sets.
pub struct SetAlias;

#[async_trait]
impl Command for SetAlias {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<Reply, BotError> {
        match args.len() {
            0 | 1 => Ok(alias_pages(&ctx.state.lock().await.aliases)),
            2 => Err(BotError::Usage(format!(
                "Too few arguments supplied. Refer to {}{} alias for usage",
                ctx.config.prefix, HELP_COMMAND
            ))),
            _ => {
                let value = args[2..].join(" ");
                let mut state = ctx.state.lock().await;
                let RegistryState { registry, aliases } = &mut *state;
                let entry = aliases.set(registry, &args[1], &value, ctx.probe).await?;
                Ok(Reply::text(format!(
                    "Set an alias for {} => {}",
                    args[1].to_lowercase(),
                    entry.value
                )))
            }
        }
    }
}

/// Summary pages followed by one page per alias. Image aliases embed the
/// image. Summary listings are split so no field outgrows Discord's limit.
fn alias_pages(aliases: &AliasStore) -> Reply {
    let sorted = aliases.list_sorted();
    if sorted.is_empty() {
        return Reply::text("No aliases have been set.");
    }

    let mut listings: Vec<String> = vec![String::new()];
    for (i, (name, _)) in sorted.iter().enumerate() {
        let line = format!("{}) **{}**", i + 1, name);
        let line = truncate_chars(&line, FIELD_VALUE_LIMIT);
        let current = listings.last_mut().filter(|listing| {
            listing.is_empty() || listing.chars().count() + 1 + line.chars().count() <= FIELD_VALUE_LIMIT
        });
        match current {
            Some(listing) => {
                if !listing.is_empty() {
                    listing.push('\n');
                }
                listing.push_str(line);
            }
            None => listings.push(line.to_string()),
        }
    }

    let mut pages: Vec<Embed> = listings
        .into_iter()
        .map(|listing| Embed::new().field("Aliases", listing, false))
        .collect();
    for (name, entry) in sorted {
        let mut page = Embed::new()
            .title(truncate_chars(name, EMBED_TITLE_LIMIT))
            .description(&entry.value);
        if entry.kind == AliasKind::Image {
            page = page.image(&entry.value);
        }
        pages.push(page);
    }
    Reply::Pages(pages)
}

pub struct UnsetAlias;

#[async_trait]
impl Command for UnsetAlias {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<Reply, BotError> {
        let [_, keyword] = args else {
            return Err(BotError::Usage("Please indicate an alias to unset".to_string()));
        };
        let mut state = ctx.state.lock().await;
        let RegistryState { registry, aliases } = &mut *state;
        aliases.unset(registry, keyword)?;
        Ok(Reply::text(format!("Removed alias {:?}", keyword.to_lowercase())))
    }
}

pub struct Info;

#[async_trait]
impl Command for Info {
    async fn run(&self, ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (builtins, aliases) = {
            let state = ctx.state.lock().await;
            (state.registry.builtins().count(), state.aliases.len())
        };

        Ok(Reply::Embed(
            Embed::new()
                .field("Version:", code(env!("CARGO_PKG_VERSION")), true)
                .field("Uptime:", code(&format_uptime(ctx.started_at.elapsed())), true)
                .field("Commands:", code(&builtins.to_string()), true)
                .field("Aliases:", code(&aliases.to_string()), true)
                .field("Usable Cores:", code(&cores), true),
        ))
    }
}

fn code(text: &str) -> String {
    format!("```{}```", text)
}

/// Longest prefix of `text` holding at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Wraps program output in a code block that fits in one message.
pub fn code_block(output: &str) -> String {
    code(truncate_chars(output, MESSAGE_LIMIT - 6))
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Shows the running config with the token redacted.
pub struct ShowConfig;

#[async_trait]
impl Command for ShowConfig {
    async fn run(&self, ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        Ok(Reply::Embed(Embed::new().field(
            "Config:",
            truncate_chars(&format!("```json\n{}\n```", ctx.config), FIELD_VALUE_LIMIT),
            true,
        )))
    }
}

#[derive(Deserialize)]
struct Quote {
    #[serde(rename = "quoteText")]
    text: String,
    #[serde(rename = "quoteAuthor", default)]
    author: String,
}

/// Fetches a quote from forismatic.
pub struct Inspire;

#[async_trait]
impl Command for Inspire {
    async fn run(&self, ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        let key = rand::random_range(0..1_000_000u32).to_string();
        let quote: Quote = ctx
            .http
            .post(&ctx.endpoints.quote_url)
            .form(&[
                ("method", "getQuote"),
                ("format", "json"),
                ("key", key.as_str()),
                ("lang", "en"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let author = match quote.author.trim() {
            "" => "Unknown",
            author => author,
        };
        Ok(Reply::text(format!("{:?} - {}", quote.text.trim(), author)))
    }
}

#[derive(Deserialize)]
struct DynmapStatus {
    #[serde(default)]
    players: Vec<DynmapPlayer>,
}

#[derive(Deserialize)]
struct DynmapPlayer {
    name: String,
}

/// Lists who is online according to the server's dynmap feed.
pub struct Minecraft;

#[async_trait]
impl Command for Minecraft {
    async fn run(&self, ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        let status: DynmapStatus = ctx
            .http
            .get(&ctx.endpoints.minecraft_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if status.players.is_empty() {
            return Ok(Reply::text("Nobody home :("));
        }

        let players: String = status
            .players
            .iter()
            .enumerate()
            .map(|(i, player)| format!("{}. {}\n", i + 1, player.name))
            .collect();
        let players = truncate_chars(&players, MESSAGE_LIMIT - 16);
        Ok(Reply::text(format!("```markdown\n{}```", players)))
    }
}

/// Runs a local program and replies with its output.
pub struct SystemReport {
    program: &'static str,
    args: &'static [&'static str],
}

impl SystemReport {
    pub const fn new(program: &'static str, args: &'static [&'static str]) -> Self {
        SystemReport { program, args }
    }

    fn failure(&self, source: io::Error) -> BotError {
        BotError::Process {
            program: self.program.to_string(),
            source,
        }
    }
}

#[async_trait]
impl Command for SystemReport {
    async fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
        let output = tokio::time::timeout(
            PROCESS_TIMEOUT,
            Process::new(self.program)
                .args(self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| self.failure(io::Error::new(io::ErrorKind::TimedOut, "timed out")))?
        .map_err(|e| self.failure(e))?;

        if !output.status.success() {
            return Err(self.failure(io::Error::other(format!("exited with {}", output.status))));
        }
        Ok(Reply::text(code_block(&String::from_utf8_lossy(&output.stdout))))
    }
}
