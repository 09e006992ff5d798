//! Static file resolution behind the plugin protocol.
//!
//! A request path is tried literally, then against the configured index
//! files, then with each configured suffix appended. Hidden paths are never
//! served. Paths that only resolved implicitly are redirected to their
//! canonical form unless `disable_canonical_uris` is set.
//!
//! Lookups use the percent-decoded path. Redirect targets are built from the
//! path as the client sent it.

pub mod fs;
pub mod hide;

pub use fs::{DirFs, FileInfo, FileSystem, MemoryFs};
pub use hide::HidePatterns;

use crate::plugin::Handler;
use crate::protocol::{ConfigMap, HandledReply, PluginQuery, PluginReply};
use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const DEFAULT_INDEX_NAMES: &[&str] = &["index.html", "index.htm", "index.txt"];
pub const DEFAULT_FILE_SUFFIX: &[&str] = &["html", "htm", "txt"];
pub const SERVED_BY: &str = "Static-Plugin";

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Unix timestamp baked in at compile time, if the build provided one.
pub fn compiled_build_time() -> Option<i64> {
    option_env!("STATIC_PLUGIN_BUILD_TIME").and_then(|s| s.trim().parse().ok())
}

/// One immutable configuration snapshot.
#[derive(Clone)]
pub struct Settings {
    pub fs: Arc<dyn FileSystem>,
    pub pass_next: bool,
    pub index_names: Vec<String>,
    pub file_suffix: Vec<String>,
    pub hide: HidePatterns,
    pub canonical_uris: bool,
    pub build_time: Option<i64>,
}

impl Settings {
    pub fn defaults(fs: Arc<dyn FileSystem>, build_time: Option<i64>) -> Self {
        Self {
            fs,
            pass_next: false,
            index_names: DEFAULT_INDEX_NAMES.iter().map(|s| s.to_string()).collect(),
            file_suffix: DEFAULT_FILE_SUFFIX.iter().map(|s| s.to_string()).collect(),
            hide: HidePatterns::default(),
            canonical_uris: true,
            build_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Literal,
    Index,
    Suffix,
}

struct Resolved {
    /// Path within the file source.
    fs_path: String,
    info: FileInfo,
    via: Via,
}

pub struct StaticFileResolver {
    default_fs: Arc<dyn FileSystem>,
    default_build_time: Option<i64>,
    settings: ArcSwap<Settings>,
}

impl StaticFileResolver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self::with_build_time(fs, compiled_build_time())
    }

    pub fn with_build_time(fs: Arc<dyn FileSystem>, build_time: Option<i64>) -> Self {
        let settings = Settings::defaults(fs.clone(), build_time);
        Self {
            default_fs: fs,
            default_build_time: build_time,
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Build a complete snapshot from `config`. Keys that are absent fall
    /// back to their defaults, never to the previous snapshot.
    pub async fn settings_from(&self, config: &ConfigMap) -> anyhow::Result<Settings> {
        let fs: Arc<dyn FileSystem> = match first(config, "root") {
            Some(root) => Arc::new(
                DirFs::open(root)
                    .await
                    .with_context(|| format!("root '{root}' is not a readable directory"))?,
            ),
            None => self.default_fs.clone(),
        };

        let build_time = match first(config, "build_time") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .with_context(|| format!("build_time '{raw}' is not a unix timestamp"))?,
            ),
            None => self.default_build_time,
        };

        let hide = match config.get("hide") {
            Some(patterns) => {
                HidePatterns::new(patterns.as_slice()).context("invalid hide pattern")?
            }
            None => HidePatterns::default(),
        };

        let mut settings = Settings::defaults(fs, build_time);
        settings.pass_next = config.contains_key("pass_next");
        settings.canonical_uris = !config.contains_key("disable_canonical_uris");
        settings.hide = hide;
        if let Some(names) = config.get("index_names") {
            settings.index_names = names.clone();
        }
        if let Some(suffixes) = config.get("file_suffix") {
            settings.file_suffix = suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_string())
                .collect();
        }
        Ok(settings)
    }

    async fn lookup(&self, s: &Settings, fs_path: &str) -> Option<FileInfo> {
        let info = s.fs.stat(fs_path).await.ok()?;
        if !info.is_dir && s.hide.is_hidden(&format!("/{fs_path}")) {
            debug!(path = fs_path, "Skipping hidden file");
            return None;
        }
        Some(info)
    }

    async fn resolve(&self, s: &Settings, path: &str) -> Option<Resolved> {
        let trailing = path.ends_with('/');
        let base = path.trim_matches('/').to_string();

        let literal = self.lookup(s, &base).await;
        let is_dir = match &literal {
            Some(info) if !info.is_dir => {
                return Some(Resolved {
                    fs_path: base,
                    info: info.clone(),
                    via: Via::Literal,
                })
            }
            Some(_) => true,
            None => false,
        };

        if is_dir || (literal.is_none() && !trailing) {
            for name in &s.index_names {
                let candidate = join(&base, name);
                if let Some(info) = self.lookup(s, &candidate).await {
                    if !info.is_dir {
                        return Some(Resolved {
                            fs_path: candidate,
                            info,
                            via: Via::Index,
                        });
                    }
                }
            }
        }

        if !trailing && !base.is_empty() {
            for suffix in &s.file_suffix {
                let candidate = format!("{base}.{suffix}");
                if let Some(info) = self.lookup(s, &candidate).await {
                    if !info.is_dir {
                        return Some(Resolved {
                            fs_path: candidate,
                            info,
                            via: Via::Suffix,
                        });
                    }
                }
            }
        }

        None
    }

    fn not_found(s: &Settings) -> PluginReply {
        if s.pass_next {
            return PluginReply::not_handled();
        }
        PluginReply::handled(HandledReply::new().with_status(404).with_body("Not found"))
    }
}

#[async_trait]
impl Handler for StaticFileResolver {
    async fn serve(&self, query: PluginQuery) -> anyhow::Result<PluginReply> {
        let s = self.settings.load_full();
        let raw = if query.url.path.starts_with('/') {
            query.url.path.clone()
        } else {
            format!("/{}", query.url.path)
        };
        let Some(path) = decode_path(&raw) else {
            debug!(path = %raw, "Rejected undecodable request path");
            return Ok(Self::not_found(&s));
        };

        if s.hide.is_hidden(&path) {
            return Ok(Self::not_found(&s));
        }

        let Some(found) = self.resolve(&s, &path).await else {
            debug!(path = %path, "No file matched");
            return Ok(Self::not_found(&s));
        };

        if s.canonical_uris {
            if let Some(target) = canonical_redirect(&raw, &found) {
                let mut reply = HandledReply::new().with_status(301);
                reply.set_header("Location", with_query(&target, query.url.raw_query.as_deref()));
                return Ok(PluginReply::handled(reply));
            }
        }

        let mut reply = HandledReply::new();
        reply.set_header("X-Served-By", SERVED_BY);
        reply.set_header(
            "Content-Type",
            mime_guess::from_path(&found.fs_path)
                .first_or_octet_stream()
                .essence_str(),
        );

        let last_modified = s
            .build_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|t| t.format(HTTP_DATE).to_string());
        if let Some(value) = &last_modified {
            reply.set_header("Last-Modified", value.clone());
        }

        let etag = found
            .info
            .etag
            .clone()
            .unwrap_or_else(|| compute_etag(found.info.modified, found.info.len));
        reply.set_header("ETag", etag.clone());

        let unmodified_since = match (query.header("If-Modified-Since"), &last_modified) {
            (Some(since), Some(value)) => !since.is_empty() && since == value,
            _ => false,
        };
        let etag_matches = query
            .header("If-None-Match")
            .is_some_and(|candidates| etag_in(candidates, &etag));

        if unmodified_since || etag_matches {
            return Ok(PluginReply::handled(reply.with_status(304)));
        }

        if !query.method.eq_ignore_ascii_case("HEAD") {
            let body = s
                .fs
                .read(&found.fs_path)
                .await
                .with_context(|| format!("failed to read {}", found.fs_path))?;
            reply = reply.with_body(body);
        }

        Ok(PluginReply::handled(reply))
    }

    async fn set_config(&self, config: ConfigMap) -> anyhow::Result<bool> {
        match self.settings_from(&config).await {
            Ok(settings) => {
                self.settings.store(Arc::new(settings));
                Ok(true)
            }
            Err(e) => {
                warn!("Rejected configuration, keeping previous settings: {e:#}");
                Ok(false)
            }
        }
    }
}

fn first<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// Percent-decode a request path.
///
/// Encoded separators, NUL bytes, invalid UTF-8 and `..` segments yield
/// `None`.
fn decode_path(raw: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("%2f") || lower.contains("%5c") {
        return None;
    }
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    if decoded.contains('\0') || decoded.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(decoded.into_owned())
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Where an implicitly resolved path should live, if not where it was asked.
fn canonical_redirect(path: &str, found: &Resolved) -> Option<String> {
    let target = match found.via {
        Via::Index if !path.ends_with('/') => format!("{path}/"),
        Via::Literal if path.ends_with('/') && path != "/" => {
            path.trim_end_matches('/').to_string()
        }
        _ => return None,
    };
    Some(sanitize_redirect(&target))
}

/// Collapse leading slashes so the target cannot be read as `//host/...`.
fn sanitize_redirect(target: &str) -> String {
    format!("/{}", target.trim_start_matches('/'))
}

fn with_query(path: &str, raw_query: Option<&str>) -> String {
    match raw_query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

/// Tag from modification time and size only. Contents are never hashed.
pub fn compute_etag(modified: Option<SystemTime>, len: u64) -> String {
    let nanos = modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("\"{}{}\"", base36(nanos), base36(u128::from(len)))
}

fn base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn etag_in(header: &str, etag: &str) -> bool {
    let bare = etag.trim_start_matches("W/");
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == bare
    })
}
