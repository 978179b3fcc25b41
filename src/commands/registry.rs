use std::collections::BTreeMap;

use super::{CommandDescriptor, CommandKind};
use crate::aliases::AliasEntry;

/// Merged keyword table of built-in commands and aliases.
///
/// Keywords are stored lower-cased. A keyword owned by a built-in can never
/// be taken over by an alias.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandDescriptor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the descriptor for `keyword`.
    pub fn register(&mut self, keyword: &str, descriptor: CommandDescriptor) {
        self.commands.insert(keyword.to_lowercase(), descriptor);
    }

    pub fn get(&self, keyword: &str) -> Option<&CommandDescriptor> {
        self.commands.get(&keyword.to_lowercase())
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn is_builtin(&self, keyword: &str) -> bool {
        self.get(keyword).is_some_and(CommandDescriptor::is_builtin)
    }

    /// Installs the alias unless a built-in holds the keyword. Returns whether
    /// it was installed.
    pub fn install_alias(&mut self, keyword: &str, entry: AliasEntry) -> bool {
        if self.is_builtin(keyword) {
            return false;
        }
        self.register(keyword, CommandDescriptor::alias(entry));
        true
    }

    /// Removes an alias-backed keyword. Built-ins are left untouched.
    pub fn remove_alias(&mut self, keyword: &str) -> Option<AliasEntry> {
        let key = keyword.to_lowercase();
        if !self.commands.get(&key).is_some_and(CommandDescriptor::is_alias) {
            return None;
        }
        match self.commands.remove(&key).map(|d| d.kind) {
            Some(CommandKind::Alias(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Drops every alias descriptor and installs `aliases` underneath the
    /// built-ins.
    pub fn replace_aliases<'a>(&mut self, aliases: impl IntoIterator<Item = (&'a String, &'a AliasEntry)>) {
        self.commands.retain(|_, descriptor| descriptor.is_builtin());
        for (keyword, entry) in aliases {
            self.install_alias(keyword, entry.clone());
        }
    }

    /// All entries in keyword order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandDescriptor)> {
        self.commands.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn builtins(&self) -> impl Iterator<Item = (&str, &CommandDescriptor)> {
        self.iter().filter(|(_, d)| d.is_builtin())
    }

    pub fn alias_count(&self) -> usize {
        self.commands.values().filter(|d| d.is_alias()).count()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliases::AliasKind;
    use crate::commands::{Command, CommandContext, Reply};
    use crate::error::BotError;
    use serenity::async_trait;

    struct Noop;

    #[async_trait]
    impl Command for Noop {
        async fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<Reply, BotError> {
            Ok(Reply::text("noop"))
        }
    }

    fn entry(value: &str) -> AliasEntry {
        AliasEntry {
            value: value.to_string(),
            kind: AliasKind::Other,
        }
    }

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register("help", CommandDescriptor::builtin("help text", Noop));
        registry.register("Ping", CommandDescriptor::builtin("ping text", Noop));
        registry
    }

    #[test]
    fn test_register_lowercases_keyword() {
        let registry = registry();
        assert!(registry.get("ping").is_some());
        assert!(registry.get("PING").is_some());
        assert!(registry.is_builtin("ping"));
    }

    #[test]
    fn test_alias_cannot_shadow_builtin() {
        let mut registry = registry();
        assert!(!registry.install_alias("help", entry("x")));
        assert!(registry.is_builtin("help"));
        assert_eq!(registry.get("help").unwrap().help, "help text");
    }

    #[test]
    fn test_replace_aliases_keeps_builtins_on_top() {
        let mut registry = registry();
        let mut aliases = BTreeMap::new();
        aliases.insert("help".to_string(), entry("hijack"));
        aliases.insert("motd".to_string(), entry("Welcome"));

        registry.replace_aliases(&aliases);
        assert!(registry.is_builtin("help"));
        assert_eq!(registry.get("motd").unwrap().help, "Welcome");
        assert_eq!(registry.alias_count(), 1);

        registry.replace_aliases(&BTreeMap::<String, AliasEntry>::new());
        assert!(registry.get("motd").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_alias_ignores_builtins() {
        let mut registry = registry();
        registry.install_alias("motd", entry("Welcome"));

        assert!(registry.remove_alias("ping").is_none());
        assert!(registry.contains("ping"));
        assert_eq!(registry.remove_alias("MOTD").unwrap().value, "Welcome");
        assert!(!registry.contains("motd"));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut registry = registry();
        registry.install_alias("abc", entry("1"));
        let keys: Vec<&str> = registry.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["abc", "help", "ping"]);
        let builtins: Vec<&str> = registry.builtins().map(|(k, _)| k).collect();
        assert_eq!(builtins, vec!["help", "ping"]);
    }
}
