use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::types::{Completeness, FactKind};
use crate::notify::Category;

// ---------------------------------------------------------------------------
// SentinelConfig — file-based config loader (dom-sentinel.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "DOM_SENTINEL_CONFIG";
pub const CONFIG_FILE_NAME: &str = "dom-sentinel.json";

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Watcher timings and the completeness predicate (the `watch` key).
#[derive(Deserialize, Default, Clone, Debug)]
pub struct WatchConfig {
    /// Debounce window for mutation bursts. Default: 200.
    pub mutation_quiet_ms: Option<u64>,
    /// Quiet window before a complete fact set counts as stable. Default: 500.
    pub stability_quiet_ms: Option<u64>,
    /// Class carried by nodes this tool injects into the page.
    pub self_injection_class: Option<String>,
    pub minimum_completeness_fields: Option<Vec<FactKind>>,
    pub completeness_any_of: Option<Vec<FactKind>>,
}

impl WatchConfig {
    /// JSON field → `DOM_SENTINEL_MUTATION_QUIET_MS` → 200 ms.
    pub fn resolve_mutation_quiet(&self) -> Duration {
        let ms = self
            .mutation_quiet_ms
            .or_else(|| env_u64("DOM_SENTINEL_MUTATION_QUIET_MS"))
            .unwrap_or(200);
        Duration::from_millis(ms)
    }

    /// JSON field → `DOM_SENTINEL_STABILITY_QUIET_MS` → 500 ms.
    pub fn resolve_stability_quiet(&self) -> Duration {
        let ms = self
            .stability_quiet_ms
            .or_else(|| env_u64("DOM_SENTINEL_STABILITY_QUIET_MS"))
            .unwrap_or(500);
        Duration::from_millis(ms)
    }

    pub fn resolve_self_injection_class(&self) -> String {
        self.self_injection_class
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "marker-highlight".to_string())
    }

    pub fn resolve_completeness(&self) -> Completeness {
        let default = Completeness::default();
        Completeness {
            required: self
                .minimum_completeness_fields
                .clone()
                .unwrap_or(default.required),
            any_of: self.completeness_any_of.clone().unwrap_or(default.any_of),
        }
    }
}

/// Notification scheduling (the `notifications` key).
#[derive(Deserialize, Default, Clone, Debug)]
pub struct NotificationsConfig {
    /// Auto-clear timeout. `0` keeps notifications until dismissed. Default: 54000.
    pub timeout_ms: Option<u64>,
    /// Coalescing guard between two dispatches in one session. Default: 300.
    pub guard_ms: Option<u64>,
    pub blocked: Option<bool>,
    pub host_retry_attempts: Option<u32>,
    pub persistent_categories: Option<Vec<Category>>,
    pub icon_dir: Option<String>,
    pub default_icon: Option<String>,
}

impl NotificationsConfig {
    /// JSON field → `DOM_SENTINEL_NOTIFICATION_TIMEOUT_MS` → 54000 ms.
    pub fn resolve_timeout(&self) -> Duration {
        let ms = self
            .timeout_ms
            .or_else(|| env_u64("DOM_SENTINEL_NOTIFICATION_TIMEOUT_MS"))
            .unwrap_or(54_000);
        Duration::from_millis(ms)
    }

    pub fn resolve_guard(&self) -> Duration {
        Duration::from_millis(self.guard_ms.unwrap_or(300))
    }

    /// JSON field → `DOM_SENTINEL_BLOCKED` ("1"/"true") → `false`.
    pub fn resolve_blocked(&self) -> bool {
        if let Some(b) = self.blocked {
            return b;
        }
        std::env::var("DOM_SENTINEL_BLOCKED")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn resolve_host_retry_attempts(&self) -> u32 {
        self.host_retry_attempts.unwrap_or(3).max(1)
    }

    pub fn resolve_persistent_categories(&self) -> Vec<Category> {
        self.persistent_categories
            .clone()
            .unwrap_or_else(|| vec![Category::Testing])
    }

    pub fn resolve_icon_dir(&self) -> String {
        self.icon_dir
            .clone()
            .unwrap_or_else(|| "img/flags".to_string())
    }

    pub fn resolve_default_icon(&self) -> String {
        self.default_icon
            .clone()
            .unwrap_or_else(|| "img/128.png".to_string())
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct ExtractConfig {
    pub ticket_link_base: Option<String>,
}

impl ExtractConfig {
    /// JSON field → `DOM_SENTINEL_TICKET_LINK_BASE` → the support chat base URL.
    pub fn resolve_ticket_link_base(&self) -> String {
        self.ticket_link_base
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("DOM_SENTINEL_TICKET_LINK_BASE"))
            .unwrap_or_else(|| "https://supchat.taxi.yandex-team.ru/chat/".to_string())
    }
}

/// Button-search flow (the `search` key).
#[derive(Deserialize, Default, Clone, Debug)]
pub struct SearchConfig {
    pub poll_interval_ms: Option<u64>,
    pub tag_attempts: Option<u32>,
    pub profession_attempts: Option<u32>,
    pub settle_ms: Option<u64>,
    pub close_delay_ms: Option<u64>,
    /// Enabled presets in order: `tags`, `profession`, `custom_tags:N`.
    pub presets: Option<Vec<String>>,
    /// Custom tag names per preset number (`"1": ["tag a", "tag b"]`).
    pub custom_tags: Option<BTreeMap<String, Vec<String>>>,
    pub search_driver_info: Option<bool>,
    /// Page listing test results per driver license.
    pub testing_url: Option<String>,
    pub testing_poll_ms: Option<u64>,
    pub testing_attempts: Option<u32>,
}

impl SearchConfig {
    pub fn resolve_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(90).max(1))
    }

    pub fn resolve_tag_attempts(&self) -> u32 {
        self.tag_attempts.unwrap_or(27).max(1)
    }

    pub fn resolve_profession_attempts(&self) -> u32 {
        self.profession_attempts.unwrap_or(100).max(1)
    }

    pub fn resolve_settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(450))
    }

    pub fn resolve_close_delay(&self) -> Duration {
        Duration::from_millis(self.close_delay_ms.unwrap_or(450))
    }

    pub fn resolve_presets(&self) -> Vec<String> {
        self.presets.clone().unwrap_or_else(|| {
            vec![
                "tags".to_string(),
                "profession".to_string(),
                "custom_tags:1".to_string(),
            ]
        })
    }

    /// Custom tag names keyed by set number. Unparseable keys are skipped and
    /// each set keeps at most four names.
    pub fn resolve_custom_tags(&self) -> BTreeMap<usize, Vec<String>> {
        self.custom_tags
            .iter()
            .flatten()
            .filter_map(|(k, names)| {
                let n = k.trim().parse().ok()?;
                Some((n, names.iter().take(4).cloned().collect()))
            })
            .collect()
    }

    pub fn resolve_search_driver_info(&self) -> bool {
        self.search_driver_info.unwrap_or(true)
    }

    /// JSON field → `DOM_SENTINEL_TESTING_URL` → the education export page.
    pub fn resolve_testing_url(&self) -> String {
        self.testing_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("DOM_SENTINEL_TESTING_URL"))
            .unwrap_or_else(|| "https://education.taxi.yandex/export-results".to_string())
    }

    pub fn resolve_testing_poll(&self) -> Duration {
        Duration::from_millis(self.testing_poll_ms.unwrap_or(180).max(1))
    }

    pub fn resolve_testing_attempts(&self) -> u32 {
        self.testing_attempts.unwrap_or(50).max(1)
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

impl ServerConfig {
    /// JSON field → `DOM_SENTINEL_PORT` → `PORT` → 5000.
    pub fn resolve_port(&self) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        for k in ["DOM_SENTINEL_PORT", "PORT"] {
            if let Some(p) = std::env::var(k).ok().and_then(|v| v.trim().parse().ok()) {
                return p;
            }
        }
        5000
    }
}

/// Top-level config loaded from `dom-sentinel.json`.
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct SentinelConfig {
    pub watch: WatchConfig,
    pub notifications: NotificationsConfig,
    pub extract: ExtractConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
}

/// Load `dom-sentinel.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `DOM_SENTINEL_CONFIG` env var path
/// 2. `./dom-sentinel.json`
/// 3. `../dom-sentinel.json`
///
/// Missing file → defaults. Parse error → warning and defaults.
pub fn load_sentinel_config() -> SentinelConfig {
    let mut candidates = vec![
        PathBuf::from(CONFIG_FILE_NAME),
        PathBuf::from("..").join(CONFIG_FILE_NAME),
    ];
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match serde_json::from_str::<SentinelConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("{} loaded from {}", CONFIG_FILE_NAME, path.display());
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    "{} parse error at {}: {} (using defaults)",
                    CONFIG_FILE_NAME,
                    path.display(),
                    e
                );
                SentinelConfig::default()
            }
        };
    }

    SentinelConfig::default()
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Read-only configuration snapshot handed to a scan session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub minimum_completeness_fields: Vec<FactKind>,
    #[serde(default)]
    pub completeness_any_of: Vec<FactKind>,
    pub notification_timeout_ms: u64,
    #[serde(default)]
    pub blocked: bool,
}

impl ConfigSnapshot {
    pub fn completeness(&self) -> Completeness {
        Completeness {
            required: self.minimum_completeness_fields.clone(),
            any_of: self.completeness_any_of.clone(),
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Timings {
    pub mutation_quiet: Duration,
    pub stability_quiet: Duration,
    pub notify_guard: Duration,
    pub host_retry_initial: Duration,
}

#[derive(Debug, Clone)]
pub struct IconSettings {
    pub flag_dir: String,
    pub default_icon: String,
}

impl IconSettings {
    pub fn flag(&self, name: &str) -> String {
        format!("{}/{}.png", self.flag_dir.trim_end_matches('/'), name)
    }
}

impl Default for IconSettings {
    fn default() -> Self {
        NotificationsConfig::default().icon_settings()
    }
}

impl NotificationsConfig {
    pub fn icon_settings(&self) -> IconSettings {
        IconSettings {
            flag_dir: self.resolve_icon_dir(),
            default_icon: self.resolve_default_icon(),
        }
    }
}

/// Fully resolved settings for one scan session.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub snapshot: ConfigSnapshot,
    pub timings: Timings,
    pub self_injection_class: String,
    pub ticket_link_base: String,
    pub host_retry_attempts: u32,
    pub persistent_categories: Vec<Category>,
    pub icons: IconSettings,
}

impl ScanSettings {
    pub fn from_config(cfg: &SentinelConfig) -> Self {
        let completeness = cfg.watch.resolve_completeness();
        Self {
            snapshot: ConfigSnapshot {
                minimum_completeness_fields: completeness.required,
                completeness_any_of: completeness.any_of,
                notification_timeout_ms: cfg.notifications.resolve_timeout().as_millis() as u64,
                blocked: cfg.notifications.resolve_blocked(),
            },
            timings: Timings {
                mutation_quiet: cfg.watch.resolve_mutation_quiet(),
                stability_quiet: cfg.watch.resolve_stability_quiet(),
                notify_guard: cfg.notifications.resolve_guard(),
                host_retry_initial: Duration::from_millis(100),
            },
            self_injection_class: cfg.watch.resolve_self_injection_class(),
            ticket_link_base: cfg.extract.resolve_ticket_link_base(),
            host_retry_attempts: cfg.notifications.resolve_host_retry_attempts(),
            persistent_categories: cfg.notifications.resolve_persistent_categories(),
            icons: cfg.notifications.icon_settings(),
        }
    }

    /// Same settings with a caller-supplied snapshot.
    pub fn with_snapshot(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let cfg: SentinelConfig = serde_json::from_str(
            r#"{ "watch": { "stability_quiet_ms": 750 }, "notifications": { "blocked": true, "timeout_ms": 0 } }"#,
        )
        .unwrap();
        let settings = ScanSettings::from_config(&cfg);

        assert_eq!(settings.timings.stability_quiet, Duration::from_millis(750));
        assert_eq!(settings.timings.notify_guard, Duration::from_millis(300));
        assert!(settings.snapshot.blocked);
        assert_eq!(settings.snapshot.notification_timeout_ms, 0);
        assert_eq!(settings.persistent_categories, vec![Category::Testing]);
        assert_eq!(settings.self_injection_class, "marker-highlight");
    }

    #[test]
    fn completeness_fields_parse_as_kinds() {
        let cfg: SentinelConfig = serde_json::from_str(
            r#"{ "watch": { "minimum_completeness_fields": ["ticket", "driver_license"], "completeness_any_of": [] } }"#,
        )
        .unwrap();
        let rule = cfg.watch.resolve_completeness();
        assert_eq!(rule.required, vec![FactKind::Ticket, FactKind::DriverLicense]);
        assert!(rule.any_of.is_empty());
    }

    #[test]
    fn flag_icon_path_joins_directory() {
        let icons = IconSettings {
            flag_dir: "img/flags/".into(),
            default_icon: "img/128.png".into(),
        };
        assert_eq!(icons.flag("Россия"), "img/flags/Россия.png");
    }
}
