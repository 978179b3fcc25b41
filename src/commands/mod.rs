//! # Command System
//!
//! Keyword to handler routing for prefixed text commands.
//!
//! Every keyword maps to a [`CommandDescriptor`]. Built-in descriptors carry a
//! [`Command`] implementation, alias descriptors carry the stored value they
//! echo back. Handlers return a [`Reply`] for the adapter to deliver, or a
//! [`BotError`] which the dispatcher turns into a single consistent response.

pub mod builtin;
pub mod registry;

use serenity::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::aliases::{AliasEntry, AliasStore, ContentProbe};
use crate::config::Config;
use crate::error::BotError;

pub use builtin::builtin_registry;
pub use registry::CommandRegistry;

/// Discord rejects messages longer than this.
pub const MESSAGE_LIMIT: usize = 2000;
/// Longest value a single embed field may carry.
pub const FIELD_VALUE_LIMIT: usize = 1024;
/// Combined text budget of every embed in one message.
pub const EMBED_TOTAL_LIMIT: usize = 6000;

/// A built-in command body.
#[async_trait]
pub trait Command: Send + Sync {
    /// Runs the command. `args[0]` is the keyword itself.
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<Reply, BotError>;
}

/// The registry and the alias store. Always locked together so an alias
/// mutation and its save are atomic.
pub struct RegistryState {
    pub registry: CommandRegistry,
    pub aliases: AliasStore,
}

/// External services the built-ins talk to.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub quote_url: String,
    pub minecraft_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            quote_url: builtin::QUOTE_API_URL.to_string(),
            minecraft_url: builtin::MINECRAFT_API_URL.to_string(),
        }
    }
}

/// Everything a handler may use while it runs. Handlers lock `state` only
/// for as long as they need it, never across a network call they do not
/// have to make under the lock.
pub struct CommandContext<'a> {
    pub state: &'a Mutex<RegistryState>,
    pub probe: &'a dyn ContentProbe,
    pub http: &'a reqwest::Client,
    pub endpoints: &'a Endpoints,
    pub config: &'a Config,
    pub started_at: Instant,
}

#[derive(Clone)]
pub struct CommandDescriptor {
    pub help: String,
    pub kind: CommandKind,
}

/// Separates commands shipped with the bot from user-defined aliases.
#[derive(Clone)]
pub enum CommandKind {
    Builtin(Arc<dyn Command>),
    Alias(AliasEntry),
}

impl CommandDescriptor {
    pub fn builtin(help: impl Into<String>, command: impl Command + 'static) -> Self {
        CommandDescriptor {
            help: help.into(),
            kind: CommandKind::Builtin(Arc::new(command)),
        }
    }

    /// Descriptor whose handler echoes the alias value. The value doubles as
    /// the help text.
    pub fn alias(entry: AliasEntry) -> Self {
        CommandDescriptor {
            help: entry.value.clone(),
            kind: CommandKind::Alias(entry),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, CommandKind::Builtin(_))
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.kind, CommandKind::Alias(_))
    }
}

/// What a handler hands back to the chat adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Embed(Embed),
    /// Ordered pages; the first is the summary.
    Pages(Vec<Embed>),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub colour: u32,
    pub image: Option<String>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Characters Discord counts against [`EMBED_TOTAL_LIMIT`].
    pub fn text_len(&self) -> usize {
        let title = self.title.as_deref().map_or(0, |t| t.chars().count());
        let description = self.description.as_deref().map_or(0, |d| d.chars().count());
        let fields: usize = self
            .fields
            .iter()
            .map(|f| f.name.chars().count() + f.value.chars().count())
            .sum();
        title + description + fields
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.image = Some(url.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}
