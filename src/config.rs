use std::fmt;

use crate::{executor::Auth, OpsDeckError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:4000";
pub const DEFAULT_API_KEY_HEADER: &str = "Authorization: Bearer";

const ENV_API_URL: &str = "OPSDECK_API_URL";
const ENV_PUSH_URL: &str = "OPSDECK_PUSH_URL";
const ENV_USE_MOCK_DATA: &str = "OPSDECK_USE_MOCK_DATA";
const ENV_API_MODE: &str = "OPSDECK_API_MODE";
const ENV_API_KEY: &str = "OPSDECK_API_KEY";
const ENV_API_KEY_HEADER: &str = "OPSDECK_API_KEY_HEADER";
const ENV_DEGRADED_MODE: &str = "OPSDECK_DEGRADED_MODE";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiMode {
    /// Talks to the bundled sample API; no credentials are sent.
    #[default]
    Sample,
    Live,
}

impl ApiMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sample" => Ok(Self::Sample),
            "live" => Ok(Self::Live),
            other => Err(OpsDeckError::Config(format!(
                "{ENV_API_MODE} must be `sample` or `live`, got `{other}`"
            ))),
        }
    }
}

/// Startup settings, read once.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    /// Base URL for push channels; the REST URL unless overridden.
    pub push_url: String,
    pub use_mock_data: bool,
    pub api_mode: ApiMode,
    pub api_key: Option<String>,
    pub api_key_header: String,
    /// Serve the fallback sentinel for GETs that exhaust their retries.
    pub degraded_mode: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("push_url", &self.push_url)
            .field("use_mock_data", &self.use_mock_data)
            .field("api_mode", &self.api_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_header", &self.api_key_header)
            .field("degraded_mode", &self.degraded_mode)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            push_url: DEFAULT_API_URL.to_owned(),
            use_mock_data: true,
            api_mode: ApiMode::Sample,
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_owned(),
            degraded_mode: false,
        }
    }
}

impl Config {
    /// Reads `OPSDECK_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_url = match get(ENV_API_URL) {
            Some(url) => validate_url(ENV_API_URL, url)?,
            None => DEFAULT_API_URL.to_owned(),
        };
        let push_url = match get(ENV_PUSH_URL) {
            Some(url) => validate_url(ENV_PUSH_URL, url)?,
            None => api_url.clone(),
        };
        let api_mode = get(ENV_API_MODE)
            .map(|raw| ApiMode::parse(&raw))
            .transpose()?
            .unwrap_or_default();
        let degraded_mode = get(ENV_DEGRADED_MODE)
            .map(|raw| parse_bool(ENV_DEGRADED_MODE, &raw))
            .transpose()?
            .unwrap_or(false);
        let api_key_header = match get(ENV_API_KEY_HEADER) {
            Some(header) => validate_header(header.trim())?,
            None => DEFAULT_API_KEY_HEADER.to_owned(),
        };

        let config = Self {
            api_url,
            push_url,
            use_mock_data: get(ENV_USE_MOCK_DATA).map_or(true, |raw| raw.trim() != "false"),
            api_mode,
            api_key: get(ENV_API_KEY).map(|key| key.trim().to_owned()),
            api_key_header,
            degraded_mode,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(config = ?config, "loaded configuration");

        Ok(config)
    }

    /// Credentials for outgoing requests. Only live mode sends a key.
    pub fn auth(&self) -> Auth {
        let Some(key) = self.api_key.as_deref().filter(|_| self.api_mode == ApiMode::Live) else {
            return Auth::None;
        };
        let header = self.api_key_header.as_str();
        if header == DEFAULT_API_KEY_HEADER || header.eq_ignore_ascii_case("authorization") {
            Auth::bearer(key)
        } else {
            Auth::ApiKey {
                header: header.to_owned(),
                value: key.to_owned(),
            }
        }
    }
}

fn validate_url(name: &str, raw: String) -> Result<String> {
    let url = raw.trim().trim_end_matches('/').to_owned();
    match reqwest::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
        Ok(parsed) => Err(OpsDeckError::Config(format!(
            "{name} must be an http(s) URL, got scheme `{}`",
            parsed.scheme()
        ))),
        Err(err) => Err(OpsDeckError::Config(format!("{name} is not a valid URL: {err}"))),
    }
}

/// Accepts the `Authorization: Bearer` sentinel or a valid HTTP header name.
fn validate_header(header: &str) -> Result<String> {
    if header != DEFAULT_API_KEY_HEADER {
        reqwest::header::HeaderName::from_bytes(header.as_bytes()).map_err(|err| {
            OpsDeckError::Config(format!(
                "{ENV_API_KEY_HEADER} is not a valid header name `{header}`: {err}"
            ))
        })?;
    }
    Ok(header.to_owned())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(OpsDeckError::Config(format!(
            "{name} must be a boolean, got `{other}`"
        ))),
    }
}
