// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::CrawlConfig;
use crate::crawl::{parse_document, DocumentInfo, FetchError};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// Issues single paced GET requests and hands back parsed documents.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    pacer: HostPacer,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            pacer: HostPacer::new(config.request_delay()),
        })
    }

    /// The underlying client, shared with the robots gate.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// One GET under the configured timeout, honoring the per-host interval.
    ///
    /// The interval is measured against the previous fetch's completion,
    /// not only its start: the slot is reserved before sending and stamped
    /// again once the response has been consumed, so a slow response still
    /// pushes the next request of that host out by the full delay.
    pub async fn fetch(&self, url: &Url) -> Result<DocumentInfo, FetchError> {
        let host = url.host_str().map(str::to_string);
        if let Some(host) = &host {
            self.pacer.acquire(host).await;
        }
        let result = self.request(url).await;
        if let Some(host) = &host {
            self.pacer.mark_completed(host);
        }
        result
    }

    async fn request(&self, url: &Url) -> Result<DocumentInfo, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        if !is_textual_html(response.headers()) {
            return Err(FetchError::NonHtml);
        }
        let body = response.text().await.map_err(FetchError::from_reqwest)?;
        if body.trim().is_empty() {
            return Err(FetchError::Parse);
        }
        Ok(parse_document(&body))
    }
}

/// A missing Content-Type is treated as html, plenty of small servers
/// never send one.
fn is_textual_html(headers: &HeaderMap) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()) {
        Some(content_type) => {
            let content_type = content_type.to_ascii_lowercase();
            content_type.starts_with("text/html")
                || content_type.starts_with("application/xhtml+xml")
        }
        None => true,
    }
}

/// Reserves fetch slots so two requests against the same host are at least
/// one delay apart. The reservation happens under the lock, the waiting
/// outside of it. [HostPacer::mark_completed] moves the slot again when a
/// request finishes, keeping the interval completion-to-completion.
#[derive(Debug)]
struct HostPacer {
    delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostPacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, host: &str) {
        if self.delay.is_zero() {
            return;
        }
        let slot = {
            let mut slots = self.lock();
            let now = Instant::now();
            let slot = slots.get(host).copied().filter(|at| *at > now).unwrap_or(now);
            slots.insert(host.to_string(), slot + self.delay);
            slot
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(slot)).await;
    }

    /// Pushes the host's next slot to one full delay after this completion
    /// if the response outlived its start-time reservation.
    fn mark_completed(&self, host: &str) {
        if self.delay.is_zero() {
            return;
        }
        let mut slots = self.lock();
        let earliest_next = Instant::now() + self.delay;
        let slot = slots.entry(host.to_string()).or_insert(earliest_next);
        if *slot < earliest_next {
            *slot = earliest_next;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod test {
    use super::{Fetcher, HostPacer};
    use crate::config::CrawlConfig;
    use crate::crawl::FetchError;
    use std::time::{Duration, Instant};
    use url::Url;

    fn test_config() -> CrawlConfig {
        CrawlConfig {
            request_delay_ms: 0,
            ..CrawlConfig::default()
        }
    }

    #[tokio::test]
    async fn fetches_title_and_links() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html><head><title>Hub</title></head><body><a href=\"/a\">a</a></body></html>")
            .create_async()
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let url = Url::parse(&server.url()).unwrap();
        let document = fetcher.fetch(&url).await.unwrap();
        assert_eq!(document.title.as_deref(), Some("Hub"));
        assert_eq!(document.links, vec!["/a"]);
    }

    #[tokio::test]
    async fn non_html_content_is_a_typed_failure() {
        let mut server = mockito::Server::new_async().await;
        let _payload = server
            .mock("GET", "/data")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/data", server.url())).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await.unwrap_err(),
            FetchError::NonHtml
        ));
    }

    #[tokio::test]
    async fn status_codes_are_reported() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await.unwrap_err(),
            FetchError::HttpStatus(404)
        ));
    }

    #[tokio::test]
    async fn pacer_spaces_same_host_fetches() {
        let pacer = HostPacer::new(Duration::from_millis(50));
        let started = Instant::now();
        pacer.acquire("h.test").await;
        pacer.acquire("h.test").await;
        pacer.acquire("h.test").await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn pacer_spaces_completions_of_slow_responses() {
        let pacer = HostPacer::new(Duration::from_millis(80));
        pacer.acquire("h.test").await;
        // a response that outlives its start-time reservation
        tokio::time::sleep(Duration::from_millis(160)).await;
        pacer.mark_completed("h.test");

        let started = Instant::now();
        pacer.acquire("h.test").await;
        assert!(started.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn pacer_does_not_couple_hosts() {
        let pacer = HostPacer::new(Duration::from_millis(200));
        let started = Instant::now();
        pacer.acquire("a.test").await;
        pacer.acquire("b.test").await;
        assert!(started.elapsed() < Duration::from_millis(150));
    }
}
