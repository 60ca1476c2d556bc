//! Session authentication against the content source
//!
//! Two paths produce the same [`AuthSession`]:
//! - the form path submits the login form over plain HTTP with a cookie jar
//! - the browser path drives a scripted browser and imports its cookies
//!
//! Either way the session is only handed out after it has been confirmed
//! independently of the login response status, using logout/account
//! indicators, a welcome string naming the account, or a session cookie
//! minted by the login exchange.

mod evidence;
mod form;


pub use evidence::{PageIndicators, inspect_document, inspect_page};
pub use form::{LoginForm, parse_login_form};

use crate::browser::{BrowserAutomation, BrowserCookie, LoginRequest};
use crate::config::{Config, RetryConfig, SourceConfig};
use crate::error::AuthError;
use crate::retry::with_retry;
use crate::types::{AuthEvidence, AuthPath};
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;

/// An authenticated session
///
/// Owned by a single run and dropped at its end. Downstream stages fetch
/// through [`client`](Self::client) and, when a browser is available,
/// render pages through [`browser`](Self::browser) with the session's cookies.
pub struct AuthSession {
    client: reqwest::Client,
    jar: Arc<Jar>,
    browser: Option<Arc<dyn BrowserAutomation>>,
    path: AuthPath,
    evidence: Vec<AuthEvidence>,
    landing_url: url::Url,
    landing_html: String,
}

impl AuthSession {
    /// HTTP client carrying the session cookies
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Browser capability, if one is configured
    pub fn browser(&self) -> Option<&Arc<dyn BrowserAutomation>> {
        self.browser.as_ref()
    }

    /// Path that established the session
    pub fn path(&self) -> AuthPath {
        self.path
    }

    /// Indicators that confirmed the session
    pub fn evidence(&self) -> &[AuthEvidence] {
        &self.evidence
    }

    /// Whether at least one indicator confirmed the session
    pub fn is_authenticated(&self) -> bool {
        !self.evidence.is_empty()
    }

    /// Page reached after login
    pub fn landing_url(&self) -> &url::Url {
        &self.landing_url
    }

    /// Document of the page reached after login
    pub fn landing_html(&self) -> &str {
        &self.landing_html
    }

    /// Session cookies for `url`, in the shape the browser expects
    pub fn browser_cookies(&self, url: &url::Url) -> Vec<BrowserCookie> {
        evidence::cookie_snapshot(&self.jar, url)
            .into_iter()
            .map(|(name, value)| BrowserCookie {
                name,
                value,
                domain: None,
                path: None,
                url: Some(url.to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
impl AuthSession {
    /// Session without a login exchange, for exercising downstream stages
    pub(crate) fn detached(
        landing_url: url::Url,
        landing_html: &str,
        browser: Option<Arc<dyn BrowserAutomation>>,
    ) -> Self {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .unwrap_or_default();
        Self {
            client,
            jar,
            browser,
            path: AuthPath::Form,
            evidence: vec![AuthEvidence::SessionCookie],
            landing_url,
            landing_html: landing_html.to_string(),
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("path", &self.path)
            .field("evidence", &self.evidence)
            .field("landing_url", &self.landing_url.as_str())
            .field("browser", &self.browser.as_ref().map(|b| b.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Establishes sessions against the content source
pub struct Authenticator {
    source: SourceConfig,
    retry: RetryConfig,
    request_timeout: Duration,
    browser: Option<Arc<dyn BrowserAutomation>>,
}

struct Page {
    url: url::Url,
    status: reqwest::StatusCode,
    html: String,
}

impl Authenticator {
    /// Create an authenticator; `browser` enables the fallback path
    pub fn new(config: &Config, browser: Option<Arc<dyn BrowserAutomation>>) -> Self {
        Self {
            source: config.source.clone(),
            retry: config.retry.clone(),
            request_timeout: config.download.request_timeout,
            browser,
        }
    }

    /// Establish and confirm a session
    ///
    /// JavaScript-gated sources go straight to the browser. Otherwise the form
    /// path runs first (with retries for network failures) and any failure
    /// hands over to the browser when one is configured.
    pub async fn authenticate(&self) -> Result<AuthSession, AuthError> {
        if self.source.javascript_gated {
            let Some(browser) = &self.browser else {
                return Err(AuthError::FallbackUnavailable {
                    reason: "source is JavaScript-gated but no browser endpoint is configured"
                        .to_string(),
                });
            };
            tracing::debug!(browser = browser.name(), "source is JavaScript-gated, using browser login");
            return self.browser_login_with_retry(browser).await;
        }

        let form_result = with_retry(&self.retry, "form login", || self.form_login()).await;
        match (form_result, &self.browser) {
            (Ok(session), _) => Ok(session),
            (Err(e), None) => Err(e),
            (Err(e), Some(browser)) => {
                tracing::warn!(
                    error = %e,
                    browser = browser.name(),
                    "form login failed, falling back to browser login"
                );
                self.browser_login_with_retry(browser).await
            }
        }
    }

    fn landing_target(&self) -> &str {
        self.source.listing_url.as_deref().unwrap_or(&self.source.url)
    }

    fn build_client(&self, jar: Arc<Jar>) -> Result<reqwest::Client, AuthError> {
        reqwest::Client::builder()
            .cookie_provider(jar)
            .user_agent(self.source.user_agent.as_str())
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| AuthError::NetworkFailure {
                reason: format!("failed to build HTTP client: {e}"),
            })
    }

    async fn form_login(&self) -> Result<AuthSession, AuthError> {
        let login_url = parse_url(self.source.login_url())?;
        let landing_url = parse_url(self.landing_target())?;
        let jar = Arc::new(Jar::default());
        let client = self.build_client(jar.clone())?;

        let login_page = get_page(&client, &login_url).await?;
        if !login_page.status.is_success() {
            return Err(AuthError::LoginFormNotFound {
                url: login_page.url.to_string(),
            });
        }
        let form = parse_login_form(&login_page.html, &login_page.url, &self.source)?;
        let baseline = evidence::cookie_snapshot(&jar, &landing_url);

        tracing::debug!(
            action = %form.action,
            extra_fields = form.extra_fields.len(),
            "submitting login form"
        );
        let fields = form.fields(&self.source.username, &self.source.password);
        let request = if form.is_get {
            client.get(form.action.clone()).query(&fields)
        } else {
            client.post(form.action.clone()).form(&fields)
        };
        let resp = request.send().await.map_err(network_failure)?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::CredentialsRejected {
                reason: format!("login submission returned {status}"),
            });
        }
        if is_transient(status) {
            return Err(AuthError::NetworkFailure {
                reason: format!("login submission returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(AuthError::CredentialsRejected {
                reason: format!("login submission returned {status}"),
            });
        }
        let response_html = resp.text().await.map_err(network_failure)?;

        let landing = get_page(&client, &landing_url).await?;
        let fresh_cookie = evidence::has_fresh_session_cookie(
            &baseline,
            &evidence::cookie_snapshot(&jar, &landing.url),
        );

        self.confirm(
            AuthPath::Form,
            client,
            jar,
            &response_html,
            landing,
            fresh_cookie,
        )
    }

    async fn browser_login_with_retry(
        &self,
        browser: &Arc<dyn BrowserAutomation>,
    ) -> Result<AuthSession, AuthError> {
        with_retry(&self.retry, "browser login", || self.browser_login(browser)).await
    }

    async fn browser_login(
        &self,
        browser: &Arc<dyn BrowserAutomation>,
    ) -> Result<AuthSession, AuthError> {
        let landing_url = parse_url(self.landing_target())?;
        let login = browser.login(&LoginRequest::from_source(&self.source)).await?;
        let final_url = url::Url::parse(&login.url).unwrap_or_else(|_| landing_url.clone());

        let jar = Arc::new(Jar::default());
        for cookie in &login.cookies {
            jar.add_cookie_str(&set_cookie_line(cookie, &final_url), &final_url);
        }
        let client = self.build_client(jar.clone())?;

        let cookies: Vec<BrowserCookie> = login
            .cookies
            .iter()
            .map(|c| BrowserCookie {
                url: c.domain.is_none().then(|| final_url.to_string()),
                ..c.clone()
            })
            .collect();
        let landing_html = browser
            .capture(landing_url.as_str(), &cookies)
            .await
            .map_err(|e| AuthError::NetworkFailure {
                reason: format!("failed to render landing page: {e}"),
            })?;
        let landing = Page {
            url: landing_url,
            status: reqwest::StatusCode::OK,
            html: landing_html,
        };

        // A fresh browser profile holds no cookies before the login script runs
        let fresh_cookie = login.cookies.iter().any(|c| !c.value.is_empty());

        self.confirm(
            AuthPath::Browser,
            client,
            jar,
            &login.html,
            landing,
            fresh_cookie,
        )
    }

    fn confirm(
        &self,
        path: AuthPath,
        client: reqwest::Client,
        jar: Arc<Jar>,
        post_login_html: &str,
        landing: Page,
        fresh_cookie: bool,
    ) -> Result<AuthSession, AuthError> {
        let after_login = inspect_page(post_login_html, &self.source);
        let on_landing = inspect_page(&landing.html, &self.source);

        let mut found = Vec::new();
        for item in after_login.evidence().into_iter().chain(on_landing.evidence()) {
            if !found.contains(&item) {
                found.push(item);
            }
        }
        if fresh_cookie {
            found.push(AuthEvidence::SessionCookie);
        }

        if found.is_empty() {
            tracing::warn!(?path, url = %landing.url, "no session indicator after login");
            if after_login.is_login_page() {
                return Err(AuthError::CredentialsRejected {
                    reason: "login form re-rendered after submission".to_string(),
                });
            }
            return Err(AuthError::NotAuthenticated {
                url: landing.url.to_string(),
            });
        }

        tracing::info!(?path, evidence = ?found, "session authenticated");
        Ok(AuthSession {
            client,
            jar,
            browser: self.browser.clone(),
            path,
            evidence: found,
            landing_url: landing.url,
            landing_html: landing.html,
        })
    }
}

async fn get_page(client: &reqwest::Client, url: &url::Url) -> Result<Page, AuthError> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(network_failure)?;
    let status = resp.status();
    if is_transient(status) {
        return Err(AuthError::NetworkFailure {
            reason: format!("{url} returned {status}"),
        });
    }
    let url = resp.url().clone();
    let html = resp.text().await.map_err(network_failure)?;
    Ok(Page { url, status, html })
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

fn network_failure(e: reqwest::Error) -> AuthError {
    AuthError::NetworkFailure {
        reason: e.to_string(),
    }
}

fn parse_url(raw: &str) -> Result<url::Url, AuthError> {
    url::Url::parse(raw).map_err(|e| AuthError::LoginFormNotFound {
        url: format!("{raw} ({e})"),
    })
}

/// `Set-Cookie` line for importing a browser cookie into the jar
///
/// A domain equal to the page host is imported host-only.
fn set_cookie_line(cookie: &BrowserCookie, page: &url::Url) -> String {
    let mut line = format!("{}={}", cookie.name, cookie.value);
    if let Some(domain) = &cookie.domain {
        let bare = domain.trim_start_matches('.');
        if Some(bare) != page.host_str() {
            line.push_str("; Domain=");
            line.push_str(bare);
        }
    }
    line.push_str("; Path=");
    line.push_str(cookie.path.as_deref().unwrap_or("/"));
    line
}
