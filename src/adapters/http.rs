use crate::utils::error::{AnalystError, Result};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Builds the shared HTTP client with the given agent and timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Turns non-success responses into `UpstreamStatusError` so retries can
/// tell 5xx/429 from permanent failures.
pub fn check_status(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AnalystError::UpstreamStatusError {
            service: service.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Enforces a minimum interval between consecutive requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let sleep_for = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: sleeping {:?}", sleep_for);
                tokio::time::sleep(sleep_for).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// robots.txt URL for the host serving `page_url`.
pub fn robots_url(page_url: &str) -> Option<String> {
    let parsed = Url::parse(page_url).ok()?;
    let host = parsed.host_str()?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some(format!("{}/robots.txt", origin))
}

/// Checks the `User-agent: *` group of a robots.txt body against `path`.
pub fn robots_allows(robots_txt: &str, path: &str) -> bool {
    let mut in_wildcard_group = false;
    for raw_line in robots_txt.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => in_wildcard_group = value == "*",
            "disallow" if in_wildcard_group => {
                if value == "/" || (!value.is_empty() && path.starts_with(value)) {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

/// Fetches robots.txt for `page_url`; a missing or unreachable file allows.
pub async fn check_robots_txt(client: &Client, page_url: &str) -> bool {
    let Some(robots) = robots_url(page_url) else {
        return true;
    };
    let path = Url::parse(page_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string());

    let response = match client
        .get(&robots)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => r,
        Ok(_) => return true,
        Err(e) => {
            tracing::debug!("Robots.txt check failed for {}: {}", robots, e);
            return true;
        }
    };

    match response.text().await {
        Ok(body) => robots_allows(&body, &path),
        Err(_) => true,
    }
}
