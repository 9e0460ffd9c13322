//! Declarative backend candidates and named presets
//!
//! A candidate list is loaded once at startup and never mutated. The
//! selector walks it in ascending priority order.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// One backend configuration considered during selection
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCandidate {
    /// Model name sent to the backend (e.g., "gemini-1.5-flash")
    pub name: String,
    /// Lower is tried first
    pub priority: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Bound on a single backend call, probe or runtime
    pub timeout: Duration,
    /// Extra attempts after the first one for retryable failures
    pub max_retries: u32,
}

impl ModelCandidate {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Candidates sorted by ascending priority. Ties keep list order.
pub fn by_priority(candidates: &[ModelCandidate]) -> Vec<&ModelCandidate> {
    let mut ordered: Vec<&ModelCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.priority);
    ordered
}

/// Named behavioral profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Full assistant: broad fallback list, stable models preferred
    #[default]
    Assistant,
    /// Low-latency chat: experimental flash model first
    Realtime,
}

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Assistant => "assistant",
            Profile::Realtime => "realtime",
        }
    }

    fn model_names(self) -> &'static [&'static str] {
        match self {
            Profile::Assistant => &[
                "gemini-2.5-pro",
                "gemini-1.5-flash",
                "gemini-1.5-pro",
                "gemini-pro",
                "gemini-2.0-flash-exp",
            ],
            Profile::Realtime => &[
                "gemini-2.0-flash-exp",
                "gemini-1.5-flash",
                "gemini-1.5-pro",
                "gemini-pro",
            ],
        }
    }

    pub fn candidates(self) -> Vec<ModelCandidate> {
        (0u32..)
            .zip(self.model_names())
            .map(|(priority, name)| ModelCandidate::new(*name, priority))
            .collect()
    }

    /// One system message plus ten exchanges
    pub fn window_size(self) -> usize {
        match self {
            Profile::Assistant | Profile::Realtime => 21,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Profile::Assistant => {
                "You are a friendly, knowledgeable assistant. Remember the conversation \
                 so far, give accurate and useful answers, and keep a professional but \
                 warm tone."
            }
            Profile::Realtime => {
                "You are a friendly assistant. Keep answers concise but complete, and \
                 keep the conversation flowing naturally."
            }
        }
    }

    /// Runtime failures tolerated on the active model before reselecting
    pub fn reselect_after_failures(self) -> u32 {
        match self {
            Profile::Assistant | Profile::Realtime => 3,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assistant" | "default" => Ok(Profile::Assistant),
            "realtime" => Ok(Profile::Realtime),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}
