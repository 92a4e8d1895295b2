use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub sqlite_path: String,
    pub redis_url: Option<String>,
    pub slack_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_api_base: String,
    /// Channel that receives impersonation notices.
    pub general_channel: String,
    /// Display name of this bot; its own posts are never moderated.
    pub bot_name: String,
    pub muzzle_min_ms: u64,
    pub muzzle_max_ms: u64,
    pub backfire_base_chance: f64,
    pub backfire_step_chance: f64,
    pub backfire_lookback_secs: u64,
    pub max_issuances: u32,
    pub issuance_window_secs: u64,
    pub probation_ms: u64,
    pub counter_window_ms: u64,
    pub counter_reversal_ms: u64,
    pub abuse_penalty_ms: u64,
    pub redaction_quota: u32,
    pub max_word_length: usize,
    pub delete_max_retries: u32,
    pub delete_backoff_ms: u64,
    pub placeholder: String,
    pub signature_max_age_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: "./muzzle.sqlite".to_string(),
            redis_url: None,
            slack_token: None,
            slack_signing_secret: None,
            slack_api_base: "https://slack.com/api".to_string(),
            general_channel: "#general".to_string(),
            bot_name: "muzzle".to_string(),
            muzzle_min_ms: 30_000,
            muzzle_max_ms: 180_000,
            backfire_base_chance: 0.05,
            backfire_step_chance: 0.10,
            backfire_lookback_secs: 7 * 24 * 3600,
            max_issuances: 2,
            issuance_window_secs: 3600,
            probation_ms: 24 * 3600 * 1000,
            counter_window_ms: 5 * 60 * 1000,
            counter_reversal_ms: 5 * 60 * 1000,
            abuse_penalty_ms: 300_000,
            redaction_quota: 7,
            max_word_length: 10,
            delete_max_retries: 5,
            delete_backoff_ms: 5000,
            placeholder: "..mMm..".to_string(),
            signature_max_age_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            redis_url: std::env::var("REDIS_URL").ok(),
            slack_token: std::env::var("SLACK_BOT_TOKEN").ok(),
            slack_signing_secret: std::env::var("SLACK_SIGNING_SECRET").ok(),
            slack_api_base: std::env::var("SLACK_API_BASE").unwrap_or(d.slack_api_base),
            general_channel: std::env::var("GENERAL_CHANNEL").unwrap_or(d.general_channel),
            bot_name: std::env::var("BOT_NAME").unwrap_or(d.bot_name),
            muzzle_min_ms: env_or("MUZZLE_MIN_MS", d.muzzle_min_ms),
            muzzle_max_ms: env_or("MUZZLE_MAX_MS", d.muzzle_max_ms),
            backfire_base_chance: env_or("BACKFIRE_BASE_CHANCE", d.backfire_base_chance),
            backfire_step_chance: env_or("BACKFIRE_STEP_CHANCE", d.backfire_step_chance),
            backfire_lookback_secs: env_or("BACKFIRE_LOOKBACK_SECS", d.backfire_lookback_secs),
            max_issuances: env_or("MAX_ISSUANCES", d.max_issuances),
            issuance_window_secs: env_or("ISSUANCE_WINDOW_SECS", d.issuance_window_secs),
            probation_ms: env_or("PROBATION_MS", d.probation_ms),
            counter_window_ms: env_or("COUNTER_WINDOW_MS", d.counter_window_ms),
            counter_reversal_ms: env_or("COUNTER_REVERSAL_MS", d.counter_reversal_ms),
            abuse_penalty_ms: env_or("ABUSE_PENALTY_MS", d.abuse_penalty_ms),
            redaction_quota: env_or("REDACTION_QUOTA", d.redaction_quota),
            max_word_length: env_or("MAX_WORD_LENGTH", d.max_word_length),
            delete_max_retries: env_or("DELETE_MAX_RETRIES", d.delete_max_retries),
            delete_backoff_ms: env_or("DELETE_BACKOFF_MS", d.delete_backoff_ms),
            placeholder: std::env::var("MUZZLE_PLACEHOLDER").unwrap_or(d.placeholder),
            signature_max_age_secs: env_or("SIGNATURE_MAX_AGE_SECS", d.signature_max_age_secs),
        }
    }

    pub fn issuance_window(&self) -> Duration {
        Duration::from_secs(self.issuance_window_secs)
    }

    pub fn probation(&self) -> Duration {
        Duration::from_millis(self.probation_ms)
    }

    pub fn counter_window(&self) -> Duration {
        Duration::from_millis(self.counter_window_ms)
    }

    pub fn abuse_penalty(&self) -> Duration {
        Duration::from_millis(self.abuse_penalty_ms)
    }
}
