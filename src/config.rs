//! Process configuration from the environment

use crate::llm::{ModelCandidate, Profile};
use crate::service::ServiceConfig;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown profile {0:?} (expected assistant or realtime)")]
    UnknownProfile(String),
    #[error("no backend credentials: set GOOGLE_API_KEY or LLM_GATEWAY")]
    MissingCredentials,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    /// `None` when explicitly disabled with an empty value
    pub system_prompt: Option<String>,
    pub window_size: usize,
    pub reselect_after_failures: u32,
    pub db_path: PathBuf,
    pub port: u16,
    pub google_api_key: Option<String>,
    pub gateway: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Bad numbers fall back to the profile default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let profile = match lookup("PARLEY_PROFILE") {
            Some(name) => {
                Profile::from_str(&name).map_err(|_| ConfigError::UnknownProfile(name))?
            }
            None => Profile::default(),
        };

        let system_prompt = match lookup("PARLEY_SYSTEM_PROMPT") {
            Some(prompt) if prompt.trim().is_empty() => None,
            Some(prompt) => Some(prompt),
            None => Some(profile.system_prompt().to_string()),
        };

        let db_path = lookup("PARLEY_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".parley").join("parley.db")
            },
            PathBuf::from,
        );

        // Room for the system message (if any) plus the new user message
        let min_window = if system_prompt.is_some() { 2 } else { 1 };
        let mut window_size = parse_or(&lookup, "PARLEY_WINDOW", profile.window_size());
        if window_size < min_window {
            tracing::warn!(
                window = window_size,
                min = min_window,
                default = profile.window_size(),
                "Window too small to hold the user message, using default"
            );
            window_size = profile.window_size();
        }

        Ok(Self {
            profile,
            system_prompt,
            window_size,
            reselect_after_failures: parse_or(
                &lookup,
                "PARLEY_RESELECT_AFTER",
                profile.reselect_after_failures(),
            ),
            db_path,
            port: parse_or(&lookup, "PARLEY_PORT", DEFAULT_PORT),
            google_api_key: lookup("GOOGLE_API_KEY").filter(|k| !k.is_empty()),
            gateway: lookup("LLM_GATEWAY").filter(|g| !g.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.google_api_key.is_none() && self.gateway.is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }

    pub fn candidates(&self) -> Vec<ModelCandidate> {
        self.profile.candidates()
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            system_prompt: self.system_prompt.clone(),
            window_size: self.window_size,
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}
