use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::discovery::ResourceKind;
use crate::error::{ConfigError, Result};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chromium: ChromiumSection,
    pub pool: PoolSection,
    pub discovery: DiscoverySection,
    pub server: ServerSection,
    pub targets: TargetsSection,
}

impl EngineConfig {
    /// Applies `CHROME_PATH` / `PUPPETEER_EXECUTABLE_PATH` and `PORT`.
    pub fn apply_env_overrides(&mut self) {
        let chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("PUPPETEER_EXECUTABLE_PATH"))
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = chrome_path {
            self.chromium.set_executable(PathBuf::from(path.trim()));
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(err) => warn!(value = %port, error = %err, "ignoring unparseable PORT"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chromium.launch_mode == LaunchMode::Managed
            && self.chromium.executable_path.is_none()
        {
            return Err(ConfigError::Invalid(
                "chromium.launch_mode = \"managed\" requires chromium.executable_path".into(),
            ));
        }
        if self.pool.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "pool.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.discovery.settle_delay_ms > self.discovery.max_settle_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "discovery.settle_delay_ms ({}) exceeds discovery.max_settle_delay_ms ({})",
                self.discovery.settle_delay_ms, self.discovery.max_settle_delay_ms
            )));
        }
        for raw in &self.discovery.block_resource_types {
            if raw.parse::<ResourceKind>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "discovery.block_resource_types: unknown resource type {raw:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Selects how the Chromium binary is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Launch the binary named by `executable_path`.
    Managed,
    /// Let the driver locate a locally installed Chromium.
    #[default]
    Bundled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub launch_mode: LaunchMode,
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub user_agent: String,
    pub extra_args: Vec<String>,
    pub request_timeout_seconds: Option<u64>,
}

impl ChromiumSection {
    pub fn set_executable(&mut self, path: PathBuf) {
        self.executable_path = Some(path);
        self.launch_mode = LaunchMode::Managed;
    }
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            launch_mode: LaunchMode::Bundled,
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_args: Vec::new(),
            request_timeout_seconds: Some(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub idle_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl PoolSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 5 * 60,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub max_settle_delay_ms: u64,
    pub evaluation_timeout_ms: u64,
    pub manifest_fetch_timeout_ms: u64,
    pub block_resource_types: Vec<String>,
    pub scan_globals: bool,
    pub global_scan_max_bytes: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            settle_delay_ms: 2_000,
            max_settle_delay_ms: 15_000,
            evaluation_timeout_ms: 5_000,
            manifest_fetch_timeout_ms: 10_000,
            block_resource_types: vec!["image".into(), "stylesheet".into(), "font".into()],
            scan_globals: false,
            global_scan_max_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    pub cors_allow_any: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 9000,
            cors_allow_any: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetsSection {
    pub movie_url: String,
    pub tv_url: String,
}

impl TargetsSection {
    pub fn movie_url(&self, id: &str) -> String {
        self.movie_url.replace("{id}", &encode_segment(id))
    }

    pub fn tv_url(&self, id: &str, season: &str, episode: &str) -> String {
        self.tv_url
            .replace("{id}", &encode_segment(id))
            .replace("{season}", &encode_segment(season))
            .replace("{episode}", &encode_segment(episode))
    }
}

impl Default for TargetsSection {
    fn default() -> Self {
        Self {
            movie_url: "https://vidrock.net/movie/{id}".into(),
            tv_url: "https://vidrock.net/tv/{id}/{season}/{episode}".into(),
        }
    }
}

/// Percent-encodes a path segment. Form encoding writes spaces as `+`,
/// which a path would keep literally.
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn load_engine_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
