use dotenvy::dotenv;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SURVEY_KEYWORD: &str = "匿名店舗アンケート";

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub store_root: PathBuf,
    pub media_root: PathBuf,
    /// Messages containing this text are archived as surveys.
    pub survey_keyword: String,

    // Pacing & retry settings
    pub conversation_pause: Duration,
    pub error_cooldown: Duration,
    pub fetch_retry_backoff: Duration,
    pub max_fetch_retries: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let survey_keyword = env::var("SURVEY_KEYWORD")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SURVEY_KEYWORD.to_string());

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            store_root: env::var("STORE_ROOT")
                .unwrap_or_else(|_| "data/stores".to_string())
                .into(),
            media_root: env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "data/media".to_string())
                .into(),
            survey_keyword,
            conversation_pause: duration_var("CONVERSATION_PAUSE", "250ms")?,
            error_cooldown: duration_var("ERROR_COOLDOWN", "1s")?,
            fetch_retry_backoff: duration_var("FETCH_RETRY_BACKOFF", "2s")?,
            max_fetch_retries: env::var("MAX_FETCH_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_FETCH_RETRIES must be a non-negative integer"))?,
        })
    }

    /// Creates the store and media directories.
    pub fn prepare_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.store_root, &self.media_root] {
            fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Cannot create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

fn duration_var(name: &str, default: &str) -> anyhow::Result<Duration> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    humantime::parse_duration(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} must be a duration such as 250ms or 2s: {}", name, e))
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("store_root", &self.store_root)
            .field("media_root", &self.media_root)
            .field("survey_keyword", &self.survey_keyword)
            .field("conversation_pause", &self.conversation_pause)
            .field("error_cooldown", &self.error_cooldown)
            .field("fetch_retry_backoff", &self.fetch_retry_backoff)
            .field("max_fetch_retries", &self.max_fetch_retries)
            .finish()
    }
}
