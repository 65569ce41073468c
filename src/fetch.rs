use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::browser::PageFetcher;
use crate::constants::constants;

/// `reqwest`-backed page fetcher. The client keeps no cookie jar, so requests
/// carry no credentials.
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new(user_agent: Option<&str>) -> Result<Self> {
    let c = constants();
    let client = Client::builder()
      .user_agent(user_agent.unwrap_or(&c.user_agent))
      .timeout(c.fetch_timeout())
      .redirect(Policy::limited(10))
      .build()
      .context("Failed to build HTTP client")?;
    Ok(Self { client })
  }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
  async fn fetch_page(&self, url: &str) -> Result<String> {
    let response = self
      .client
      .get(url)
      .header(CACHE_CONTROL, "no-cache")
      .header(PRAGMA, "no-cache")
      .send()
      .await
      .with_context(|| format!("Request to {} failed", url))?
      .error_for_status()
      .with_context(|| format!("Non-success status from {}", url))?;

    let body = response.text().await.with_context(|| format!("Failed to read body from {}", url))?;
    debug!(url, bytes = body.len(), "fetch: page downloaded");
    Ok(body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::DurationCache;
  use crate::cascade::{Resolution, Resolver, Strategy};
  use crate::duration::extract_duration_from_html;
  use crate::store::MemoryStore;
  use crate::testing::{FakeTabs, discarded_tab};
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  const PAGE: &str = r#"<script>{"videoDetails":{"lengthSeconds":"245"}}</script>"#;

  fn response(status: &str, extra: &str, body: &str) -> String {
    format!(
      "HTTP/1.1 {}\r\n{}Content-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
      status,
      extra,
      body.len(),
      body
    )
  }

  /// One-connection-per-request HTTP server on a random local port.
  ///
  /// `/watch` serves a page, `/moved` redirects to it, `/fresh` serves the page
  /// only when the request asks to bypass caches, anything else is a 404.
  async fn serve() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
      while let Ok((mut socket, _)) = listener.accept().await {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
          let mut request = Vec::new();
          let mut chunk = [0u8; 1024];
          while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
              Ok(0) | Err(_) => return,
              Ok(n) => request.extend_from_slice(&chunk[..n]),
            }
          }
          let request = String::from_utf8_lossy(&request).to_ascii_lowercase();
          let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
          let bypass = request.contains("cache-control: no-cache") && request.contains("pragma: no-cache");

          let reply = match path.as_str() {
            "/watch" => response("200 OK", "", PAGE),
            "/moved" => response("302 Found", "Location: /watch\r\n", ""),
            "/fresh" if bypass => response("200 OK", "", PAGE),
            "/fresh" => response("400 Bad Request", "", ""),
            _ => response("404 Not Found", "", ""),
          };
          let _ = socket.write_all(reply.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });
    (base, hits)
  }

  /// Sends every request to one fixed URL, whatever the cascade asks for.
  struct Pinned {
    inner: HttpFetcher,
    url: String,
  }

  #[async_trait]
  impl PageFetcher for Pinned {
    async fn fetch_page(&self, _url: &str) -> Result<String> {
      self.inner.fetch_page(&self.url).await
    }
  }

  #[tokio::test]
  async fn not_found_is_an_error() {
    let (base, _) = serve().await;
    let fetcher = HttpFetcher::new(None).unwrap();

    let err = fetcher.fetch_page(&format!("{}/gone", base)).await.unwrap_err();

    assert!(format!("{:#}", err).contains("404"), "unexpected error: {:#}", err);
  }

  #[tokio::test]
  async fn redirect_is_followed() {
    let (base, hits) = serve().await;
    let fetcher = HttpFetcher::new(None).unwrap();

    let body = fetcher.fetch_page(&format!("{}/moved", base)).await.unwrap();

    assert_eq!(body, PAGE);
    assert_eq!(extract_duration_from_html(&body), Some(245));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn requests_bypass_caches() {
    let (base, _) = serve().await;
    let fetcher = HttpFetcher::new(Some("tabtime-test")).unwrap();

    assert_eq!(fetcher.fetch_page(&format!("{}/fresh", base)).await.unwrap(), PAGE);
  }

  #[tokio::test]
  async fn not_found_page_falls_through_to_temp_tab() {
    let (base, hits) = serve().await;
    let watch = "https://www.youtube.com/watch?v=gone";
    let fetcher = Arc::new(Pinned { inner: HttpFetcher::new(None).unwrap(), url: format!("{}/gone", base) });
    let tabs = Arc::new(FakeTabs::new(vec![]).page_reply(watch, 77.0));
    let cache = DurationCache::with_settings(Arc::new(MemoryStore::new()), "durationCache", Duration::from_millis(500));
    let resolver = Resolver::with_timeout(cache, tabs.clone(), fetcher, Duration::from_secs(15));

    let got = resolver.resolve(&discarded_tab(3, watch)).await;

    assert_eq!(got, Some(Resolution { seconds: 77, strategy: Strategy::TempTab }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(tabs.removed().len(), 1);
  }
}
