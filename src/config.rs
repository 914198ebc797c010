use std::env;
use std::fmt;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";

pub const DEFAULT_API_KEY: &str = "sk-1234";
pub const DEFAULT_BASE_URL: &str = "http://localhost:7099/v1/";
pub const DEFAULT_MODEL: &str = "llama4";

/// Connection settings, resolved once at startup.
///
/// Every value comes from its environment variable when that is set and
/// non-empty, and from the matching `DEFAULT_*` constant otherwise.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Config {
    /// Loads an optional `.env` file from the working directory, then reads
    /// the environment.
    ///
    /// Variables already present in the environment win over the file.
    pub fn load() -> Config {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("ignoring unreadable .env file: {}", e),
        }

        Self::from_env()
    }

    /// Reads the process environment.
    pub fn from_env() -> Config {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolves the configuration against an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |name: &str, default: &str| match lookup(name) {
            Some(value) if !value.is_empty() => value,
            _ => default.to_string(),
        };

        Config {
            api_key: resolve(OPENAI_API_KEY, DEFAULT_API_KEY),
            base_url: resolve(OPENAI_BASE_URL, DEFAULT_BASE_URL),
            model: resolve(OPENAI_MODEL, DEFAULT_MODEL),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

// Keep the key out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}
