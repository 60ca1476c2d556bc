//! Browser automation for JavaScript-gated sources
//!
//! The [`BrowserAutomation`] trait is the seam the session authenticator and
//! the content fetcher use when plain HTTP is not enough: a scripted login
//! for sources that render their login form client-side, and a rendered-page
//! capture for editions served as HTML wrappers.
//!
//! [`BrowserlessClient`] implements it against a Browserless-compatible HTTP
//! API (`/function` for the scripted login, `/content` for captures).

use crate::config::{BrowserConfig, SourceConfig};
use crate::error::{AuthError, FetchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cookie exchanged with the browser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Cookie path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// URL the cookie applies to, when no domain is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Inputs to a scripted login
#[derive(Clone)]
pub struct LoginRequest {
    /// Page hosting the login form
    pub login_url: String,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
    /// CSS selector of the username input
    pub username_selector: String,
    /// CSS selector of the password input
    pub password_selector: String,
    /// CSS selector of the submit button
    pub submit_selector: String,
}

impl LoginRequest {
    /// Build a login request from source settings
    pub fn from_source(source: &SourceConfig) -> Self {
        Self {
            login_url: source.login_url().to_string(),
            username: source.username.clone(),
            password: source.password.clone(),
            username_selector: source.username_selector.clone(),
            password_selector: source.password_selector.clone(),
            submit_selector: source.submit_selector.clone(),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// State of the browser after a scripted login
#[derive(Clone, Debug, Deserialize)]
pub struct BrowserLogin {
    /// URL the browser ended on
    pub url: String,
    /// Rendered document at that URL
    pub html: String,
    /// Cookies held by the browser
    #[serde(default)]
    pub cookies: Vec<BrowserCookie>,
}

/// Scriptable browser capability
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Implementation name for logging
    fn name(&self) -> &str;

    /// Drive the login form and return the resulting browser state
    ///
    /// An automation backend that cannot be reached or started fails with
    /// [`AuthError::FallbackUnavailable`].
    async fn login(&self, request: &LoginRequest) -> Result<BrowserLogin, AuthError>;

    /// Render `url` with `cookies` set and return the final document
    async fn capture(&self, url: &str, cookies: &[BrowserCookie]) -> Result<String, FetchError>;
}

// Runs inside the automation service. Fills the form, waits for navigation,
// then reports the final URL, document and cookies.
const LOGIN_SCRIPT: &str = r#"
module.exports = async ({ page, context }) => {
  await page.goto(context.login_url, { waitUntil: 'networkidle2' });
  await page.waitForSelector(context.username_selector, { timeout: 15000 });
  await page.type(context.username_selector, context.username);
  await page.type(context.password_selector, context.password);
  await Promise.all([
    page.waitForNavigation({ waitUntil: 'networkidle2' }).catch(() => null),
    page.click(context.submit_selector),
  ]);
  const cookies = (await page.cookies()).map(c => ({
    name: c.name, value: c.value, domain: c.domain, path: c.path,
  }));
  return {
    type: 'application/json',
    data: { url: page.url(), html: await page.content(), cookies },
  };
};
"#;

/// Browserless HTTP API client
pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    /// Create a client from browser settings
    pub fn new(config: &BrowserConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthError::FallbackUnavailable {
                reason: format!("failed to build browser client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        match &self.token {
            Some(token) => format!(
                "{}/{path}?token={}",
                self.base_url,
                urlencoding::encode(token)
            ),
            None => format!("{}/{path}", self.base_url),
        }
    }
}

#[async_trait]
impl BrowserAutomation for BrowserlessClient {
    fn name(&self) -> &str {
        "browserless"
    }

    async fn login(&self, request: &LoginRequest) -> Result<BrowserLogin, AuthError> {
        let body = serde_json::json!({
            "code": LOGIN_SCRIPT,
            "context": {
                "login_url": request.login_url,
                "username": request.username,
                "password": request.password,
                "username_selector": request.username_selector,
                "password_selector": request.password_selector,
                "submit_selector": request.submit_selector,
            },
        });

        let resp = self
            .client
            .post(self.endpoint("function"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_builder() {
                    AuthError::FallbackUnavailable {
                        reason: format!("browser endpoint unreachable: {e}"),
                    }
                } else {
                    AuthError::NetworkFailure {
                        reason: format!("browser login request failed: {e}"),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(if status == reqwest::StatusCode::REQUEST_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                AuthError::NetworkFailure {
                    reason: format!("browser service throttled the login ({status}): {message}"),
                }
            } else if status.is_server_error() {
                AuthError::FallbackUnavailable {
                    reason: format!("browser service returned {status}: {message}"),
                }
            } else {
                AuthError::CredentialsRejected {
                    reason: format!("browser login script failed ({status}): {message}"),
                }
            });
        }

        let login: BrowserLogin = resp.json().await.map_err(|e| AuthError::NetworkFailure {
            reason: format!("malformed browser login response: {e}"),
        })?;

        tracing::debug!(
            url = %login.url,
            cookies = login.cookies.len(),
            "browser login script completed"
        );
        Ok(login)
    }

    async fn capture(&self, url: &str, cookies: &[BrowserCookie]) -> Result<String, FetchError> {
        let body = serde_json::json!({
            "url": url,
            "cookies": cookies,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });

        let resp = self
            .client
            .post(self.endpoint("content"))
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure {
                url: url.to_string(),
                reason: format!("browser capture failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| FetchError::NetworkFailure {
            url: url.to_string(),
            reason: format!("browser capture body interrupted: {e}"),
        })
    }
}
