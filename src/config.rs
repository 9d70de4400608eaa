use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::provider::registry::{ModelSpec, ProviderFamily};
use crate::task::MediaKind;

/// Credentials read from the deployment environment. A missing credential
/// leaves the matching provider family registered but unusable.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai: Option<String>,
    pub minimax: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(key: &Option<String>) -> &'static str {
            if key.is_some() { "[REDACTED]" } else { "<unset>" }
        }
        f.debug_struct("Credentials")
            .field("openai", &mask(&self.openai))
            .field("minimax", &mask(&self.minimax))
            .finish()
    }
}

/// Poll schedule for one asynchronous task: a delayed first check, then a
/// monotonic interval ladder over elapsed wait time, bounded by an overall
/// timeout.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the first status check. Jobs cannot finish instantly,
    /// so an immediate check would be wasted.
    pub initial_delay: Duration,
    /// Bands of (elapsed time below, check interval), in ascending order.
    pub ladder: Vec<LadderBand>,
    /// Interval once elapsed time exceeds the last band; repeats until timeout.
    pub tail_interval: Duration,
    /// Hard ceiling on total wait. One final status check runs at the
    /// boundary before the task is declared failed.
    pub overall_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LadderBand {
    pub up_to: Duration,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(20),
            ladder: vec![
                LadderBand {
                    up_to: Duration::from_secs(60),
                    interval: Duration::from_secs(10),
                },
                LadderBand {
                    up_to: Duration::from_secs(180),
                    interval: Duration::from_secs(20),
                },
                LadderBand {
                    up_to: Duration::from_secs(360),
                    interval: Duration::from_secs(45),
                },
            ],
            tail_interval: Duration::from_secs(60),
            overall_timeout: Duration::from_secs(600),
        }
    }
}

impl PollConfig {
    /// The check interval for a given elapsed wait time. A monotonic step
    /// function: the last interval repeats indefinitely.
    pub fn interval_after(&self, elapsed: Duration) -> Duration {
        for band in &self.ladder {
            if elapsed < band.up_to {
                return band.interval;
            }
        }
        self.tail_interval
    }
}

/// Retry schedule for fetching the final result after a backend reports done.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetrievalConfig {
    /// Backoff before retrying after the given 1-based attempt: doubling from
    /// the initial value, capped.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        (self.initial_backoff * factor).min(self.max_backoff)
    }
}

pub struct Config {
    pub models: HashMap<String, ModelSpec>,
    pub credentials: Credentials,
    pub poll: PollConfig,
    pub retrieval: RetrievalConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let openai = env::var("OPENAI_API_KEY").ok();
        let minimax = env::var("MINIMAX_API_KEY").ok();

        if openai.is_none() {
            tracing::warn!("OPENAI_API_KEY not set — image models unavailable");
        }
        if minimax.is_none() {
            tracing::warn!("MINIMAX_API_KEY not set — video models unavailable");
        }
        if openai.is_none() && minimax.is_none() {
            tracing::error!("no provider credentials configured — every submission will fail");
        }

        Config {
            models: builtin_models(),
            credentials: Credentials { openai, minimax },
            poll: PollConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

/// The static model table. Every deployment carries the same mapping;
/// which entries are usable depends on the credentials present.
pub fn builtin_models() -> HashMap<String, ModelSpec> {
    let mut models = HashMap::new();

    models.insert(
        "gpt-image-1".to_string(),
        ModelSpec {
            model_id: "gpt-image-1".to_string(),
            family: ProviderFamily::OpenAi,
            kind: MediaKind::Image,
            description: "OpenAI image generation, strongest prompt adherence".to_string(),
        },
    );
    models.insert(
        "dall-e-3".to_string(),
        ModelSpec {
            model_id: "dall-e-3".to_string(),
            family: ProviderFamily::OpenAi,
            kind: MediaKind::Image,
            description: "OpenAI image generation, stylized output".to_string(),
        },
    );
    models.insert(
        "video-01".to_string(),
        ModelSpec {
            model_id: "video-01".to_string(),
            family: ProviderFamily::Minimax,
            kind: MediaKind::Video,
            description: "MiniMax text-to-video, ~6s clips".to_string(),
        },
    );
    models.insert(
        "s2v-01".to_string(),
        ModelSpec {
            model_id: "S2V-01".to_string(),
            family: ProviderFamily::Minimax,
            kind: MediaKind::Video,
            description: "MiniMax subject-reference video".to_string(),
        },
    );

    models
}
