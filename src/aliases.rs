//! # Feature: Aliases
//!
//! User-defined keyword shortcuts that echo a stored value. The alias set is
//! persisted as a JSON document and merged into the command registry under
//! the built-in commands.
//!
//! ## Document format
//! ```json
//! { "version": 1, "aliases": { "motd": { "value": "Welcome", "kind": "other" } } }
//! ```
//! Documents without the `version`/`aliases` envelope are read as the legacy
//! keyword → value map (plain strings, or `{"Value", "Kind"}` objects with
//! kind 0 = image, 1 = other) and rewritten in the versioned form on the
//! next save.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::CommandRegistry;
use crate::error::BotError;

pub const DOCUMENT_VERSION: u32 = 1;

/// Upper bound for the content-type probe made when an alias is set.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasKind {
    Image,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub value: String,
    #[serde(default)]
    pub kind: AliasKind,
}

#[derive(Serialize, Deserialize)]
struct AliasDocument {
    version: u32,
    aliases: BTreeMap<String, AliasEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyAlias {
    Text(String),
    Entry {
        #[serde(alias = "Value")]
        value: String,
        #[serde(alias = "Kind", default)]
        kind: Option<u8>,
    },
}

impl From<LegacyAlias> for AliasEntry {
    fn from(legacy: LegacyAlias) -> Self {
        match legacy {
            LegacyAlias::Text(value) => AliasEntry {
                value,
                kind: AliasKind::Other,
            },
            LegacyAlias::Entry { value, kind } => AliasEntry {
                value,
                kind: match kind {
                    Some(0) => AliasKind::Image,
                    _ => AliasKind::Other,
                },
            },
        }
    }
}

/// Parses either document form. The flag is true when the legacy form was read.
fn parse_document(bytes: &[u8]) -> Result<(BTreeMap<String, AliasEntry>, bool), DocumentError> {
    let value: Value = serde_json::from_slice(bytes)?;

    // A legacy alias value is never a number, so a numeric `version` next to
    // an `aliases` object can only be the envelope.
    let versioned = value.get("version").is_some_and(Value::is_number)
        && value.get("aliases").is_some_and(Value::is_object);
    if versioned {
        let document: AliasDocument = serde_json::from_value(value)?;
        if document.version != DOCUMENT_VERSION {
            return Err(DocumentError::Version(document.version));
        }
        return Ok((document.aliases, false));
    }

    let legacy: BTreeMap<String, LegacyAlias> = serde_json::from_value(value)?;
    let aliases = legacy.into_iter().map(|(k, v)| (k, v.into())).collect();
    Ok((aliases, true))
}

enum DocumentError {
    Json(serde_json::Error),
    Version(u32),
}

impl From<serde_json::Error> for DocumentError {
    fn from(e: serde_json::Error) -> Self {
        DocumentError::Json(e)
    }
}

fn write_document(path: &Path, aliases: &BTreeMap<String, AliasEntry>) -> io::Result<()> {
    let document = AliasDocument {
        version: DOCUMENT_VERSION,
        aliases: aliases.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&document)?;

    // Write beside the target and rename so readers never see a torn file.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// In-memory alias set mirrored to the document at `path`.
#[derive(Debug)]
pub struct AliasStore {
    path: PathBuf,
    aliases: BTreeMap<String, AliasEntry>,
}

impl AliasStore {
    /// Creates an empty store. Call [`AliasStore::load`] to read the document.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document (creating an empty one if missing), replaces the
    /// in-memory set and rebuilds the aliases in `registry`.
    pub fn load(&mut self, registry: &mut CommandRegistry) -> Result<usize, BotError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Creating alias file {}", self.path.display());
                write_document(&self.path, &BTreeMap::new()).map_err(|source| BotError::AliasLoad {
                    path: self.path.clone(),
                    source,
                })?;
                fs::read(&self.path).map_err(|source| BotError::AliasLoad {
                    path: self.path.clone(),
                    source,
                })?
            }
            Err(source) => {
                return Err(BotError::AliasLoad {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let (aliases, legacy) = parse_document(&bytes).map_err(|e| match e {
            DocumentError::Json(source) => BotError::AliasParse {
                path: self.path.clone(),
                source,
            },
            DocumentError::Version(v) => BotError::UnsupportedVersion(v),
        })?;

        if legacy && !aliases.is_empty() {
            warn!(
                "Alias file {} uses the legacy format, it will be rewritten as version {} on the next change",
                self.path.display(),
                DOCUMENT_VERSION
            );
        }

        self.aliases = BTreeMap::new();
        for (keyword, entry) in aliases {
            if let Some(dropped) = self.aliases.insert(keyword.to_lowercase(), entry) {
                warn!(
                    "Alias {:?} collides with another alias once lower-cased, dropping {:?}",
                    keyword, dropped.value
                );
            }
        }
        registry.replace_aliases(&self.aliases);
        for keyword in self.aliases.keys().filter(|k| registry.is_builtin(k)) {
            warn!("Alias {:?} is shadowed by a built-in command", keyword);
        }

        info!("Loaded {} aliases from {}", self.aliases.len(), self.path.display());
        Ok(self.aliases.len())
    }

    /// Overwrites the document with the current alias set.
    pub fn save(&self) -> Result<(), BotError> {
        write_document(&self.path, &self.aliases).map_err(|source| BotError::AliasSave {
            path: self.path.clone(),
            source,
        })
    }

    /// Adds a new alias, installs it in `registry` and persists the set. If
    /// the save fails both are restored and the error is returned.
    pub async fn set(
        &mut self,
        registry: &mut CommandRegistry,
        keyword: &str,
        value: &str,
        probe: &dyn ContentProbe,
    ) -> Result<AliasEntry, BotError> {
        let keyword = keyword.to_lowercase();
        if keyword.is_empty() || keyword.contains(char::is_whitespace) {
            return Err(BotError::Usage(format!("{:?} is not a valid alias name", keyword)));
        }
        if value.trim().is_empty() {
            return Err(BotError::Usage("An alias needs a value".to_string()));
        }
        if registry.contains(&keyword) || self.aliases.contains_key(&keyword) {
            return Err(BotError::ReservedName(keyword));
        }

        let entry = AliasEntry {
            value: value.to_string(),
            kind: probe.classify(value).await,
        };

        self.aliases.insert(keyword.clone(), entry.clone());
        registry.install_alias(&keyword, entry.clone());

        if let Err(e) = self.save() {
            self.aliases.remove(&keyword);
            registry.remove_alias(&keyword);
            return Err(e);
        }

        info!("Set an alias for {} => {} ({:?})", keyword, entry.value, entry.kind);
        Ok(entry)
    }

    /// Removes an alias from the set and from `registry`, then persists.
    pub fn unset(&mut self, registry: &mut CommandRegistry, keyword: &str) -> Result<AliasEntry, BotError> {
        let keyword = keyword.to_lowercase();
        let entry = self
            .aliases
            .remove(&keyword)
            .ok_or_else(|| BotError::not_found("Alias", keyword.clone()))?;
        registry.remove_alias(&keyword);

        if let Err(e) = self.save() {
            self.aliases.insert(keyword.clone(), entry.clone());
            registry.install_alias(&keyword, entry);
            return Err(e);
        }

        info!("Removed alias {:?}", keyword);
        Ok(entry)
    }

    pub fn get(&self, keyword: &str) -> Option<&AliasEntry> {
        self.aliases.get(&keyword.to_lowercase())
    }

    /// Aliases in lexicographic keyword order.
    pub fn list_sorted(&self) -> Vec<(&str, &AliasEntry)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Classifies an alias value by what it points at.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn classify(&self, value: &str) -> AliasKind;
}

/// Issues a `HEAD` request and checks the returned `Content-Type`. Anything
/// that is not an http(s) URL, or any failure, classifies as
/// [`AliasKind::Other`].
#[derive(Clone)]
pub struct HttpContentProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpContentProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ContentProbe for HttpContentProbe {
    async fn classify(&self, value: &str) -> AliasKind {
        let url = match reqwest::Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => return AliasKind::Other,
        };

        let response = match self.client.head(url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Content probe for {} failed: {}", value, e);
                return AliasKind::Other;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        debug!("Content probe for {} returned {:?}", value, content_type);

        if content_type.contains("image") {
            AliasKind::Image
        } else {
            AliasKind::Other
        }
    }
}

/// Probe that always answers the same kind.
#[cfg(test)]
pub(crate) struct StaticProbe(pub AliasKind);

#[cfg(test)]
#[async_trait]
impl ContentProbe for StaticProbe {
    async fn classify(&self, _value: &str) -> AliasKind {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin_registry;
    use axum::http::header;
    use axum::routing::get;
    use axum::Router;

    fn store_in(dir: &tempfile::TempDir) -> (AliasStore, CommandRegistry) {
        let mut registry = builtin_registry();
        let mut store = AliasStore::new(dir.path().join("aliases.json"));
        store.load(&mut registry).unwrap();
        (store, registry)
    }

    async fn spawn_content_server() -> String {
        let app = Router::new()
            .route(
                "/logo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], "png") }),
            )
            .route(
                "/page",
                get(|| async { ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "<html></html>") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_load_creates_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(&dir);

        assert!(store.is_empty());
        let written: Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(written["version"], 1);
        assert!(written["aliases"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_load_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(
            &path,
            r#"{"motd": "Welcome", "Logo": {"Value": "http://x/logo.png", "Kind": 0}, "faq": {"value": "read it", "kind": 1}}"#,
        )
        .unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert_eq!(store.load(&mut registry).unwrap(), 3);

        assert_eq!(store.get("motd").unwrap().kind, AliasKind::Other);
        assert_eq!(store.get("logo").unwrap().kind, AliasKind::Image);
        assert_eq!(store.get("faq").unwrap().value, "read it");
        assert_eq!(registry.get("logo").unwrap().help, "http://x/logo.png");
    }

    #[test]
    fn test_legacy_document_is_rewritten_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(&path, r#"{"motd": "Welcome"}"#).unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        store.load(&mut registry).unwrap();
        store.save().unwrap();

        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["version"], 1);
        assert_eq!(written["aliases"]["motd"]["value"], "Welcome");
        assert_eq!(written["aliases"]["motd"]["kind"], "other");
    }

    #[test]
    fn test_empty_object_is_an_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(&path, "{}").unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert_eq!(store.load(&mut registry).unwrap(), 0);
    }

    #[test]
    fn test_invalid_document_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(&path, "{ \"motd\": ").unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert!(matches!(
            store.load(&mut registry),
            Err(BotError::AliasParse { .. })
        ));

        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            store.load(&mut registry),
            Err(BotError::AliasParse { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(&path, r#"{"version": 7, "aliases": {}}"#).unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert!(matches!(
            store.load(&mut registry),
            Err(BotError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_legacy_aliases_named_like_the_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(
            &path,
            r#"{"version": "see the changelog", "aliases": "run !alias"}"#,
        )
        .unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert_eq!(store.load(&mut registry).unwrap(), 2);
        assert_eq!(store.get("version").unwrap().value, "see the changelog");
        assert_eq!(store.get("aliases").unwrap().value, "run !alias");

        fs::write(
            &path,
            r#"{"version": {"Value": "v2", "Kind": 1}, "aliases": {"Value": "http://x/a.png", "Kind": 0}}"#,
        )
        .unwrap();
        assert_eq!(store.load(&mut registry).unwrap(), 2);
        assert_eq!(store.get("aliases").unwrap().kind, AliasKind::Image);
    }

    #[test]
    fn test_keys_differing_in_case_collapse_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        fs::write(&path, r#"{"Motd": "first", "motd": "second"}"#).unwrap();

        let mut registry = builtin_registry();
        let mut store = AliasStore::new(&path);
        assert_eq!(store.load(&mut registry).unwrap(), 1);
        assert_eq!(store.get("motd").unwrap().value, "second");
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, mut registry) = store_in(&dir);

        store
            .set(&mut registry, "motd", "Welcome to  the server", &StaticProbe(AliasKind::Other))
            .await
            .unwrap();
        store
            .set(&mut registry, "logo", "http://example.com/logo.png", &StaticProbe(AliasKind::Image))
            .await
            .unwrap();

        let mut reloaded_registry = builtin_registry();
        let mut reloaded = AliasStore::new(store.path());
        reloaded.load(&mut reloaded_registry).unwrap();

        assert_eq!(reloaded.list_sorted(), store.list_sorted());
        assert_eq!(reloaded.get("motd").unwrap().value, "Welcome to  the server");
        assert_eq!(reloaded_registry.alias_count(), 2);
    }

    #[tokio::test]
    async fn test_reserved_names_rejected_without_write() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, mut registry) = store_in(&dir);
        let probe = StaticProbe(AliasKind::Other);
        store.set(&mut registry, "motd", "Welcome", &probe).await.unwrap();
        let before = fs::read(store.path()).unwrap();

        let err = store.set(&mut registry, "help", "x", &probe).await.unwrap_err();
        assert!(matches!(err, BotError::ReservedName(ref k) if k == "help"));

        let err = store.set(&mut registry, "MOTD", "y", &probe).await.unwrap_err();
        assert!(matches!(err, BotError::ReservedName(ref k) if k == "motd"));

        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(store.get("motd").unwrap().value, "Welcome");
        assert!(registry.is_builtin("help"));
    }

    #[test]
    fn test_unset_missing_alias_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, mut registry) = store_in(&dir);
        fs::remove_file(store.path()).unwrap();

        let err = store.unset(&mut registry, "ghost").unwrap_err();
        assert!(matches!(err, BotError::NotFound { .. }));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_set_and_unset_scenario() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("aliases.json"), "{}").unwrap();
        let (mut store, mut registry) = store_in(&dir);

        store
            .set(&mut registry, "motd", "Welcome to the server", &StaticProbe(AliasKind::Other))
            .await
            .unwrap();
        let expected = AliasEntry {
            value: "Welcome to the server".to_string(),
            kind: AliasKind::Other,
        };
        assert_eq!(store.list_sorted(), vec![("motd", &expected)]);
        assert!(registry.get("motd").unwrap().is_alias());

        store.unset(&mut registry, "motd").unwrap();
        assert!(store.is_empty());
        assert!(registry.get("motd").is_none());
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = builtin_registry();
        let mut store = AliasStore::new(dir.path().join("missing").join("aliases.json"));

        let err = store
            .set(&mut registry, "motd", "Welcome", &StaticProbe(AliasKind::Other))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::AliasSave { .. }));
        assert!(store.get("motd").is_none());
        assert!(!registry.contains("motd"));
    }

    #[tokio::test]
    async fn test_failed_unset_save_restores_alias() {
        let dir = tempfile::tempdir().unwrap();
        let (mut store, mut registry) = store_in(&dir);
        store
            .set(&mut registry, "motd", "Welcome", &StaticProbe(AliasKind::Other))
            .await
            .unwrap();

        // Turn the temp file path into a directory so the write fails.
        let mut tmp = store.path().as_os_str().to_owned();
        tmp.push(".tmp");
        fs::create_dir(PathBuf::from(tmp)).unwrap();

        let err = store.unset(&mut registry, "motd").unwrap_err();
        assert!(matches!(err, BotError::AliasSave { .. }));
        assert!(store.get("motd").is_some());
        assert!(registry.get("motd").unwrap().is_alias());
    }

    #[tokio::test]
    async fn test_content_type_decides_kind() {
        let base = spawn_content_server().await;
        let probe = HttpContentProbe::new(reqwest::Client::new());

        assert_eq!(probe.classify(&format!("{}/logo.png", base)).await, AliasKind::Image);
        assert_eq!(probe.classify(&format!("{}/page", base)).await, AliasKind::Other);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_other() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpContentProbe::new(reqwest::Client::new()).with_timeout(Duration::from_millis(500));
        assert_eq!(probe.classify(&format!("http://{}/logo.png", addr)).await, AliasKind::Other);
        assert_eq!(probe.classify("just some text").await, AliasKind::Other);
        assert_eq!(probe.classify("ftp://example.com/logo.png").await, AliasKind::Other);
    }

    #[tokio::test]
    async fn test_set_probes_value_kind() {
        let base = spawn_content_server().await;
        let dir = tempfile::tempdir().unwrap();
        let (mut store, mut registry) = store_in(&dir);
        let probe = HttpContentProbe::new(reqwest::Client::new());

        let image = store
            .set(&mut registry, "logo", &format!("{}/logo.png", base), &probe)
            .await
            .unwrap();
        assert_eq!(image.kind, AliasKind::Image);

        let page = store
            .set(&mut registry, "site", &format!("{}/page", base), &probe)
            .await
            .unwrap();
        assert_eq!(page.kind, AliasKind::Other);
    }
}
