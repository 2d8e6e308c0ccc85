// src/config.rs
//! Process configuration, read once from the environment (a `.env` file is
//! loaded first by `main`). Empty variables count as unset.
use std::{fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use axum::http::{HeaderName, HeaderValue, Method};
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};

use crate::services::generator::GenerationParameters;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MODEL_REVISION: &str = "main";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub revision: String,
}

#[derive(Debug, Clone)]
pub enum AllowList<T> {
    Any,
    Only(Vec<T>),
}

/// Cross-origin policy. `origins: None` is the unconfigured development mode:
/// any origin is echoed back, methods and headers still apply.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub origins: Option<AllowList<HeaderValue>>,
    pub methods: Vec<Method>,
    pub headers: AllowList<HeaderName>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: None,
            methods: vec![Method::GET, Method::POST, Method::OPTIONS],
            headers: AllowList::Only(vec![axum::http::header::CONTENT_TYPE]),
        }
    }
}

impl CorsConfig {
    pub fn layer(&self) -> CorsLayer {
        let origin = match &self.origins {
            None => AllowOrigin::mirror_request(),
            Some(AllowList::Any) => AllowOrigin::any(),
            Some(AllowList::Only(list)) => AllowOrigin::list(list.clone()),
        };
        let headers = match &self.headers {
            AllowList::Any => AllowHeaders::from(Any),
            AllowList::Only(list) => AllowHeaders::list(list.clone()),
        };

        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(self.methods.clone())
            .allow_headers(headers)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// `None` runs with an empty table.
    pub reply_table: Option<PathBuf>,
    /// `None` runs without a generator.
    pub model: Option<ModelConfig>,
    pub cors: CorsConfig,
    pub static_dir: Option<PathBuf>,
    pub generation: GenerationParameters,
    pub generation_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = parse(
            "CHAT_BIND_ADDR",
            get("CHAT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let model = get("CHAT_MODEL_ID").map(|id| ModelConfig {
            id,
            revision: get("CHAT_MODEL_REVISION")
                .unwrap_or_else(|| DEFAULT_MODEL_REVISION.to_string()),
        });

        let defaults = GenerationParameters::default();
        let generation = GenerationParameters {
            max_new_tokens: parse_opt("CHAT_MAX_NEW_TOKENS", get("CHAT_MAX_NEW_TOKENS"))?
                .unwrap_or(defaults.max_new_tokens),
            do_sample: parse_opt("CHAT_DO_SAMPLE", get("CHAT_DO_SAMPLE"))?
                .unwrap_or(defaults.do_sample),
            top_p: parse_opt("CHAT_TOP_P", get("CHAT_TOP_P"))?.unwrap_or(defaults.top_p),
            temperature: parse_opt("CHAT_TEMPERATURE", get("CHAT_TEMPERATURE"))?
                .unwrap_or(defaults.temperature),
            seed: parse_opt("CHAT_SEED", get("CHAT_SEED"))?,
        };
        generation.validate().map_err(|reason| ConfigError::Invalid {
            key: "generation parameters",
            value: format!("{generation:?}"),
            reason,
        })?;

        let generation_timeout = parse_opt::<u64>(
            "CHAT_GENERATION_TIMEOUT_SECS",
            get("CHAT_GENERATION_TIMEOUT_SECS"),
        )?
        .map(Duration::from_secs);

        Ok(Self {
            bind_addr,
            reply_table: get("CHAT_REPLY_TABLE").map(PathBuf::from),
            model,
            cors: parse_cors(&get)?,
            static_dir: get("CHAT_STATIC_DIR").map(PathBuf::from),
            generation,
            generation_timeout,
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_opt<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.map(|v| parse(key, v)).transpose()
}

fn parse_list<T>(key: &'static str, value: &str) -> Result<AllowList<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if value.split(',').any(|item| item.trim() == "*") {
        return Ok(AllowList::Any);
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(key, item.to_string()))
        .collect::<Result<Vec<T>, _>>()
        .map(AllowList::Only)
}

fn parse_cors(get: &impl Fn(&str) -> Option<String>) -> Result<CorsConfig, ConfigError> {
    let mut cors = CorsConfig::default();

    if let Some(origins) = get("CHAT_CORS_ORIGINS") {
        cors.origins = Some(parse_list("CHAT_CORS_ORIGINS", &origins)?);
    }
    if let Some(methods) = get("CHAT_CORS_METHODS") {
        cors.methods = match parse_list("CHAT_CORS_METHODS", &methods)? {
            AllowList::Any => vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ],
            AllowList::Only(list) => list,
        };
    }
    if let Some(headers) = get("CHAT_CORS_HEADERS") {
        cors.headers = parse_list("CHAT_CORS_HEADERS", &headers)?;
    }
    Ok(cors)
}
