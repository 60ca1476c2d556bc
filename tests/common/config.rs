//! Test harness: a fake subscription source and orchestrator builders

use super::fixtures::{EDITION_PDF, LOGIN_PAGE, home_page};
use chrono::NaiveDate;
use edition_dl::config::{LocalProviderConfig, RetryConfig};
use edition_dl::{
    ArchiveStore, Config, FixedClock, LocalProvider, MemoryProvider, Orchestrator, ProviderConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Account used against the fake source
pub const USERNAME: &str = "reader";
/// Password used against the fake source
pub const PASSWORD: &str = "hunter2";

/// Parse a `YYYY-MM-DD` date
pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A wiremock-backed subscription site with a working form login
pub struct FakeSource {
    pub server: MockServer,
}

impl FakeSource {
    /// Start a source whose home page links to `href` labelled `label`
    pub async fn start(href: &str, label: &str) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(LOGIN_PAGE, "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(home_page(href, label), "text/html"),
            )
            .mount(&server)
            .await;
        let source = Self { server };
        source.accept_logins().await;
        source
    }

    /// Start a source publishing the PDF edition of 2024-03-01
    pub async fn with_pdf_edition() -> Self {
        let source = Self::start("/editions/2024-03-01.pdf", "Edition of 1 March 2024").await;
        source
            .serve("/editions/2024-03-01.pdf", EDITION_PDF, "application/pdf")
            .await;
        source
    }

    /// Mount the login POST handler that issues a session cookie
    pub async fn accept_logins(&self) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(303)
                    .insert_header("Location", "/")
                    .insert_header("Set-Cookie", "sid=s3cr3t; Path=/; HttpOnly"),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve `body` at `route` with the given content type
    pub async fn serve(&self, route: &str, body: impl Into<Vec<u8>>, content_type: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.into(), content_type))
            .mount(&self.server)
            .await;
    }

    /// Number of login form submissions received so far
    pub async fn login_posts(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/login")
            .count()
    }

    /// Base URL of the source
    pub fn uri(&self) -> String {
        self.server.uri()
    }
}

/// Config pointed at `source`, with downloads under `dir` and fast retries
pub fn test_config(source: &FakeSource, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.source.url = format!("{}/", source.uri());
    config.source.login_url = Some(format!("{}/login", source.uri()));
    config.source.username = USERNAME.into();
    config.source.password = PASSWORD.into();
    config.download.download_dir = dir.path().join("downloads");
    config.download.temp_dir = dir.path().join("downloads/.partial");
    config.download.request_timeout = Duration::from_secs(5);
    config.storage.primary = ProviderConfig::Local(LocalProviderConfig {
        root: dir.path().join("archive"),
        public_base_url: None,
    });
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.run.timeout = Duration::from_secs(20);
    config
}

/// In-memory primary and secondary providers
pub fn memory_providers() -> (Arc<MemoryProvider>, Arc<MemoryProvider>) {
    (
        Arc::new(MemoryProvider::new("primary")),
        Arc::new(MemoryProvider::new("secondary")),
    )
}

/// Orchestrator over memory providers with the clock pinned to `today`
pub fn memory_orchestrator(
    config: Config,
    primary: &Arc<MemoryProvider>,
    secondary: &Arc<MemoryProvider>,
    today: NaiveDate,
) -> Orchestrator {
    let store = ArchiveStore::new(
        primary.clone(),
        Some(secondary.clone()),
        config.retry.clone(),
    );
    Orchestrator::new(
        Arc::new(config),
        store,
        None,
        Arc::new(FixedClock::on(today)),
    )
}

/// Orchestrator over a local directory archive at `root`
pub fn local_orchestrator(config: Config, root: PathBuf, today: NaiveDate) -> Orchestrator {
    let provider = LocalProvider::new(&LocalProviderConfig {
        root,
        public_base_url: Some("https://cdn.example/editions/".into()),
    });
    let store = ArchiveStore::new(Arc::new(provider), None, config.retry.clone());
    Orchestrator::new(
        Arc::new(config),
        store,
        None,
        Arc::new(FixedClock::on(today)),
    )
}

/// Serve a response that promises `declared_len` bytes and hangs up after `body`
///
/// Every connection gets the same truncated response.
pub async fn truncating_server(body: &'static [u8], declared_len: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Whether live source credentials are present in the environment
pub fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    ["NEWSPAPER_URL", "NEWSPAPER_USERNAME", "NEWSPAPER_PASSWORD"]
        .iter()
        .all(|name| std::env::var(name).is_ok_and(|v| !v.is_empty()))
}
