//! Configuration types for edition-dl
//!
//! A [`Config`] is resolved once (from an optional JSON file, an optional
//! `.env` file and the process environment) and handed to the orchestrator
//! as an immutable value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Content source settings (URLs, credentials, selectors, matching rules)
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Landing page of the content source
    #[serde(default)]
    pub url: String,

    /// Login page (default: the landing page)
    #[serde(default)]
    pub login_url: Option<String>,

    /// Page listing editions (default: the post-login landing page)
    #[serde(default)]
    pub listing_url: Option<String>,

    /// Account username
    #[serde(default)]
    pub username: String,

    /// Account password
    #[serde(default)]
    pub password: String,

    /// Skip the form path and log in through the browser (default: false)
    #[serde(default)]
    pub javascript_gated: bool,

    /// CSS selector of the username input (default: `input[name="username"]`)
    #[serde(default = "default_username_selector")]
    pub username_selector: String,

    /// CSS selector of the password input (default: `input[name="password"]`)
    #[serde(default = "default_password_selector")]
    pub password_selector: String,

    /// CSS selector of the submit button (default: `button[type="submit"]`)
    #[serde(default = "default_submit_selector")]
    pub submit_selector: String,

    /// CSS selector of a logout link or account element shown after login
    #[serde(default = "default_logout_selector")]
    pub logout_selector: String,

    /// Per-deployment override selector for the edition link
    #[serde(default)]
    pub edition_link_selector: Option<String>,

    /// chrono format strings the source uses to embed dates in links
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    /// Case-insensitive labels of "today's edition" links
    #[serde(default = "default_freshness_keywords")]
    pub freshness_keywords: Vec<String>,

    /// CSS selectors whose presence marks a real front page
    #[serde(default = "default_content_markers")]
    pub content_markers: Vec<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl SourceConfig {
    /// Login page URL
    pub fn login_url(&self) -> &str {
        self.login_url.as_deref().unwrap_or(&self.url)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            login_url: None,
            listing_url: None,
            username: String::new(),
            password: String::new(),
            javascript_gated: false,
            username_selector: default_username_selector(),
            password_selector: default_password_selector(),
            submit_selector: default_submit_selector(),
            logout_selector: default_logout_selector(),
            edition_link_selector: None,
            date_formats: default_date_formats(),
            freshness_keywords: default_freshness_keywords(),
            content_markers: default_content_markers(),
            user_agent: default_user_agent(),
        }
    }
}

// Credentials stay out of Debug output so configs can be logged safely
impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url)
            .field("login_url", &self.login_url)
            .field("listing_url", &self.listing_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("javascript_gated", &self.javascript_gated)
            .field("edition_link_selector", &self.edition_link_selector)
            .finish_non_exhaustive()
    }
}

/// Browser automation endpoint (Browserless-compatible HTTP API)
#[derive(Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Base URL of the automation service
    pub endpoint: String,

    /// API token appended as `?token=`
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_browser_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl std::fmt::Debug for BrowserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory holding completed downloads (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory holding in-flight `.part` files (default: "./downloads/.partial")
    ///
    /// Must be on the same filesystem as `download_dir` for the final rename.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Per-request timeout (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// S3-compatible object storage backend
#[derive(Clone, Serialize, Deserialize)]
pub struct S3ProviderConfig {
    /// Bucket name
    pub bucket: String,

    /// Region (default: SDK resolution)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: Option<String>,

    /// Use path-style addressing (needed by most self-hosted services)
    #[serde(default)]
    pub force_path_style: bool,

    /// Static access key (default: SDK credential chain)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Static secret key
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Public base URL; when unset, presigned URLs are issued
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl std::fmt::Debug for S3ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ProviderConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .field("force_path_style", &self.force_path_style)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

/// Local-filesystem storage backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    /// Archive root directory
    pub root: PathBuf,

    /// Public base URL; when unset, `file://` URLs are issued
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// Storage backend selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// S3-compatible object store
    S3(S3ProviderConfig),
    /// Local directory
    Local(LocalProviderConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Local(LocalProviderConfig {
            root: PathBuf::from("./archive"),
            public_base_url: None,
        })
    }
}

/// Archive settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Days of editions to keep, today included (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Preferred backend
    #[serde(default)]
    pub primary: ProviderConfig,

    /// Failover backend
    #[serde(default)]
    pub secondary: Option<ProviderConfig>,

    /// Lifetime of presigned URLs (default: 3600 seconds)
    #[serde(default = "default_url_expiration", with = "duration_serde")]
    pub url_expiration: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            primary: ProviderConfig::default(),
            secondary: None,
            url_expiration: default_url_expiration(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Per-run behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Overall wall-clock deadline for one run (default: 15 minutes)
    #[serde(default = "default_run_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Execute everything except archive writes and deletions
    #[serde(default)]
    pub dry_run: bool,

    /// Re-acquire an edition even if the archive already holds it
    #[serde(default)]
    pub force_download: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: default_run_timeout(),
            dry_run: false,
            force_download: false,
        }
    }
}

/// Main configuration for edition-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content source
    #[serde(default)]
    pub source: SourceConfig,

    /// Browser automation (None = no fallback path)
    #[serde(default)]
    pub browser: Option<BrowserConfig>,

    /// Download directories and timeouts
    #[serde(default)]
    pub download: DownloadConfig,

    /// Archive backends and retention
    #[serde(default)]
    pub storage: StorageConfig,

    /// Backoff policy for network-class failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-run behavior
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    /// Resolve configuration from an optional JSON file, an optional `.env`
    /// file and the process environment, in that order of precedence (later wins)
    pub fn load(config_path: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
                    message: format!("failed to read {}: {e}", path.display()),
                    key: None,
                })?;
                serde_json::from_str(&raw).map_err(|e| Error::Config {
                    message: format!("failed to parse {}: {e}", path.display()),
                    key: None,
                })?
            }
            None => Config::default(),
        };

        if let Some(env_file) = env_file {
            match dotenvy::from_path(env_file) {
                Ok(()) => tracing::debug!(path = %env_file.display(), "loaded env file"),
                Err(e) if e.not_found() => {
                    tracing::debug!(path = %env_file.display(), "env file not found, skipping")
                }
                Err(e) => {
                    return Err(Error::Config {
                        message: format!("failed to load {}: {e}", env_file.display()),
                        key: None,
                    });
                }
            }
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Both the `NEWSPAPER_*` and `WEBSITE_*` spellings are accepted.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        if let Some(url) = first(&["NEWSPAPER_URL", "WEBSITE_URL"]) {
            self.source.url = url;
        }
        if let Some(username) = first(&["NEWSPAPER_USERNAME", "WEBSITE_USERNAME"]) {
            self.source.username = username;
        }
        if let Some(password) = first(&["NEWSPAPER_PASSWORD", "WEBSITE_PASSWORD"]) {
            self.source.password = password;
        }
        if let Some(selector) = first(&["DOWNLOAD_LINK_SELECTOR"]) {
            self.source.edition_link_selector = Some(selector);
        }
        if let Some(selector) = first(&["LOGIN_SUCCESS_SELECTOR"]) {
            self.source.logout_selector = selector;
        }
        if let Some(days) = first(&["RETENTION_DAYS", "ARCHIVE_RETENTION_DAYS"]) {
            self.storage.retention_days = parse_env(&days, "storage.retention_days")?;
        }
        if let Some(secs) = first(&["URL_EXPIRATION"]) {
            self.storage.url_expiration =
                Duration::from_secs(parse_env(&secs, "storage.url_expiration")?);
        }
        if let Some(dir) = first(&["DOWNLOAD_DIR"]) {
            self.download.download_dir = PathBuf::from(&dir);
            self.download.temp_dir = PathBuf::from(dir).join(".partial");
        }

        if let Some(bucket) = first(&["S3_BUCKET_NAME"]) {
            if let ProviderConfig::S3(s3) = &mut self.storage.primary {
                s3.bucket = bucket;
            } else {
                self.storage.primary = ProviderConfig::S3(S3ProviderConfig {
                    bucket,
                    region: None,
                    endpoint: None,
                    prefix: None,
                    force_path_style: false,
                    access_key_id: None,
                    secret_access_key: None,
                    public_base_url: None,
                });
            }
        }
        if let ProviderConfig::S3(s3) = &mut self.storage.primary {
            if let Some(region) = first(&["AWS_REGION"]) {
                s3.region = Some(region);
            }
            if let Some(endpoint) = first(&["S3_ENDPOINT_URL"]) {
                s3.endpoint = Some(endpoint);
                s3.force_path_style = true;
            }
            if let Some(key) = first(&["AWS_ACCESS_KEY_ID"]) {
                s3.access_key_id = Some(key);
            }
            if let Some(secret) = first(&["AWS_SECRET_ACCESS_KEY"]) {
                s3.secret_access_key = Some(secret);
            }
        }

        if let Some(endpoint) = first(&["BROWSERLESS_URL"]) {
            let browser = self.browser.get_or_insert_with(|| BrowserConfig {
                endpoint: String::new(),
                token: None,
                timeout: default_browser_timeout(),
            });
            browser.endpoint = endpoint;
        }
        if let (Some(token), Some(browser)) = (first(&["BROWSERLESS_TOKEN"]), &mut self.browser) {
            browser.token = Some(token);
        }

        Ok(())
    }

    /// Check required values and selector syntax
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(config_error("source URL is required", "source.url"));
        }
        for (key, value) in [
            ("source.url", Some(self.source.url.as_str())),
            ("source.login_url", self.source.login_url.as_deref()),
            ("source.listing_url", self.source.listing_url.as_deref()),
        ] {
            if let Some(value) = value
                && url::Url::parse(value).is_err()
            {
                return Err(config_error(&format!("invalid URL: {value}"), key));
            }
        }
        if self.source.username.is_empty() {
            return Err(config_error("username is required", "source.username"));
        }
        if self.source.password.is_empty() {
            return Err(config_error("password is required", "source.password"));
        }
        if self.storage.retention_days == 0 {
            return Err(config_error(
                "retention must keep at least one day",
                "storage.retention_days",
            ));
        }
        if self.source.date_formats.is_empty() && self.source.freshness_keywords.is_empty() {
            return Err(config_error(
                "at least one date format or freshness keyword is required",
                "source.date_formats",
            ));
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return Err(config_error(
                "backoff multiplier must be a finite number of at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "initial retry delay exceeds the maximum delay",
                "retry.initial_delay",
            ));
        }

        let mut selectors = vec![
            ("source.username_selector", self.source.username_selector.as_str()),
            ("source.password_selector", self.source.password_selector.as_str()),
            ("source.logout_selector", self.source.logout_selector.as_str()),
        ];
        if let Some(selector) = &self.source.edition_link_selector {
            selectors.push(("source.edition_link_selector", selector));
        }
        for marker in &self.source.content_markers {
            selectors.push(("source.content_markers", marker));
        }
        for (key, selector) in selectors {
            if scraper::Selector::parse(selector).is_err() {
                return Err(config_error(&format!("invalid CSS selector: {selector}"), key));
            }
        }

        validate_provider(&self.storage.primary, "storage.primary")?;
        if let Some(secondary) = &self.storage.secondary {
            validate_provider(secondary, "storage.secondary")?;
        }

        if let Some(browser) = &self.browser
            && url::Url::parse(&browser.endpoint).is_err()
        {
            return Err(config_error(
                &format!("invalid browser endpoint: {}", browser.endpoint),
                "browser.endpoint",
            ));
        }

        Ok(())
    }
}

fn validate_provider(provider: &ProviderConfig, key: &str) -> Result<()> {
    match provider {
        ProviderConfig::S3(s3) if s3.bucket.trim().is_empty() => {
            Err(config_error("S3 bucket name is required", key))
        }
        ProviderConfig::Local(local) if local.root.as_os_str().is_empty() => {
            Err(config_error("local archive root is required", key))
        }
        _ => Ok(()),
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn parse_env<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error(&format!("invalid value: {value}"), key))
}

fn default_username_selector() -> String {
    r#"input[name="username"]"#.to_string()
}

fn default_password_selector() -> String {
    r#"input[name="password"]"#.to_string()
}

fn default_submit_selector() -> String {
    r#"button[type="submit"]"#.to_string()
}

fn default_logout_selector() -> String {
    r##"#user-profile-link, a[href*="logout"], a[href*="signout"], a[href*="sign-out"]"##
        .to_string()
}

fn default_date_formats() -> Vec<String> {
    [
        "%Y-%m-%d",
        "%Y%m%d",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%Y/%m/%d",
        "%B %-d, %Y",
        "%-d %B %Y",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_freshness_keywords() -> Vec<String> {
    vec!["latest".into(), "current".into(), "today".into()]
}

fn default_content_markers() -> Vec<String> {
    vec![
        "article".into(),
        "main".into(),
        r#"[class*="edition"]"#.into(),
        r#"[id*="edition"]"#.into(),
    ]
}

fn default_user_agent() -> String {
    concat!("Mozilla/5.0 (compatible; edition-dl/", env!("CARGO_PKG_VERSION"), ")").to_string()
}

fn default_browser_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./downloads/.partial")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_retention_days() -> u32 {
    7
}

fn default_url_expiration() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
