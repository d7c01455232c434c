use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::fetch::{Backoff, RetryPolicy};

/// Config file looked up (optionally) in the working directory.
pub const DEFAULT_CONFIG: &str = "imdb_scraper";
const ENV_PREFIX: &str = "IMDB";

/// Load `KEY=value` lines from `path`, or from `.env` in the working directory
/// or its parents, into the process environment. Variables already set win.
///
/// Returns the file that was read, if any.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(p) => dotenvy::from_path(p).ok().map(|_| p.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Process-wide settings, built once in `main` and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
    pub site_origin: String,
    pub title_path_pattern: String,
    pub url_column: String,
    pub review_page_budget: usize,
    pub max_reviews_per_movie: usize,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: String,

    // Sentiment stage. Loaded and validated here; no stage in this binary consumes them.
    pub openai_api_key: Option<String>,
    pub model_name: String,
    pub temperature: f64,
    pub seed: u64,
    pub max_concurrency: usize,
    pub save_batch_size: usize,
    pub cost_per_1k_input_tokens: f64,
    pub cost_per_1k_output_tokens: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff: Backoff::Fixed,
            min_wait_secs: 2,
            max_wait_secs: 60,
            site_origin: "https://www.imdb.com".to_string(),
            title_path_pattern: "/title/".to_string(),
            url_column: "URL".to_string(),
            review_page_budget: 5,
            max_reviews_per_movie: 100,
            data_dir: PathBuf::from("./data"),
            output_dir: PathBuf::from("./output"),
            log_dir: PathBuf::from("./logs"),
            log_file: "application.log".to_string(),
            openai_api_key: None,
            model_name: "gpt-4o-2024-08-06".to_string(),
            temperature: 0.2,
            seed: 42,
            max_concurrency: 10,
            save_batch_size: 100,
            cost_per_1k_input_tokens: 0.0025,
            cost_per_1k_output_tokens: 0.01,
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then `IMDB_*` environment variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG).required(false),
        };
        let mut settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        if settings.openai_api_key.is_none() {
            settings.openai_api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_attempts == 0 {
            return Err(SettingsError::Invalid {
                key: "max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_wait_secs < self.min_wait_secs {
            return Err(SettingsError::Invalid {
                key: "max_wait_secs",
                reason: format!("{} is below min_wait_secs {}", self.max_wait_secs, self.min_wait_secs),
            });
        }
        if url::Url::parse(&self.site_origin).is_err() {
            return Err(SettingsError::Invalid {
                key: "site_origin",
                reason: format!("{:?} is not an absolute URL", self.site_origin),
            });
        }
        Ok(())
    }

    /// Log what was loaded. Missing optional credentials are a warning only.
    pub fn report(&self) {
        info!(
            site = %self.site_origin,
            max_attempts = self.max_attempts,
            backoff = ?self.backoff,
            timeout_secs = self.request_timeout_secs,
            "settings loaded"
        );
        debug!(
            model = %self.model_name,
            temperature = self.temperature,
            seed = self.seed,
            batch = self.save_batch_size,
            output_dir = %self.output_dir.display(),
            cost_in = self.cost_per_1k_input_tokens,
            cost_out = self.cost_per_1k_output_tokens,
            "sentiment stage settings"
        );
        if self.openai_api_key.is_none() {
            warn!("OPENAI_API_KEY not set; only the scraping stages are available");
        }
        if self.max_concurrency > 1 {
            info!(
                max_concurrency = self.max_concurrency,
                "pages are fetched one at a time; max_concurrency is not applied"
            );
        }
    }

    /// Create the data and output directories if missing. The log directory
    /// is created by `logging::init`.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.data_dir, &self.output_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            min_wait: Duration::from_secs(self.min_wait_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }

    pub fn movie_urls_path(&self) -> PathBuf {
        self.data_dir.join("IMDB_Movie_URLs.xlsx")
    }

    pub fn details_path(&self) -> PathBuf {
        self.data_dir.join("IMDb_Movie_Details.csv")
    }

    pub fn reviews_path(&self) -> PathBuf {
        self.data_dir.join("IMDb_Reviews.csv")
    }
}
