use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use reqwest::{Client, Response, Url};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub mod nearby_search;
pub mod place_details;
pub mod signing;
pub mod static_map;
pub mod street_view;

pub static DEFAULT_BASE_URL: &str = "https://maps.googleapis.com";
pub static USER_AGENT: &str = concat!("gmap-retrieval/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
// A next_page_token only becomes valid a short while after it is issued
const DEFAULT_PAGE_TOKEN_DELAY: Duration = Duration::from_secs(3);

/// Shared handle for every Google Maps web API call: the HTTP client, credentials, and the
/// retry policy for transient failures.
#[derive(Clone)]
pub struct MapsClient {
    client: Client,
    base_url: Url,
    api_key: String,
    signing_secret: Option<Vec<u8>>,
    attempts: u32,
    retry_delay: Duration,
    page_token_delay: Duration,
}

impl MapsClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(MapsClient {
            client,
            base_url: Url::parse(DEFAULT_BASE_URL)?,
            api_key: api_key.into(),
            signing_secret: None,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            page_token_delay: DEFAULT_PAGE_TOKEN_DELAY,
        })
    }

    /// Sets the URL signing secret (URL-safe base64, as shown in the Google Cloud console).
    pub fn with_signing_secret(mut self, secret: &str) -> Result<Self> {
        let decoded = URL_SAFE
            .decode(secret.trim())
            .context("URL signing secret is not valid URL-safe base64")?;
        self.signing_secret = Some(decoded);
        Ok(self)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_page_token_delay(mut self, page_token_delay: Duration) -> Self {
        self.page_token_delay = page_token_delay;
        self
    }

    pub fn page_token_delay(&self) -> Duration {
        self.page_token_delay
    }

    pub fn has_signing_secret(&self) -> bool {
        self.signing_secret.is_some()
    }

    /// Builds an endpoint URL with the given query parameters followed by the API key.
    pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
            query.append_pair("key", &self.api_key);
        }
        Ok(url)
    }

    /// Like [`MapsClient::endpoint`], but signed when a signing secret is configured.
    pub fn signed_endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let url = self.endpoint(path, params)?;
        match &self.signing_secret {
            Some(secret) => signing::sign_url(&url, secret),
            None => Ok(url),
        }
    }

    /// Sends a GET request, retrying transport errors and server errors up to the configured
    /// number of attempts. Client errors are returned immediately.
    pub async fn get(&self, url: &Url, action: &str) -> Result<Response> {
        for attempt in 1..=self.attempts {
            let err = match self.client.get(url.clone()).send().await {
                Ok(res) => match res.error_for_status() {
                    Ok(res) => return Ok(res),
                    Err(err) if err.status().map_or(false, |s| s.is_server_error()) => {
                        anyhow!(err)
                    }
                    Err(err) => return Err(anyhow!(err)),
                },
                Err(err) => anyhow!(err),
            };
            if attempt == self.attempts {
                return Err(err.context(format!("{} failed in {} attempts", action, attempt)));
            }
            warn_and_sleep(action, err, attempt, self.retry_delay).await;
        }
        Err(anyhow!("{} was never attempted", action))
    }
}

pub async fn warn_and_sleep(action: &str, error: anyhow::Error, attempt: u32, delay: Duration) {
    let duration = delay * attempt;
    warn!(
        action,
        error = %error,
        attempt,
        duration = ?duration,
        "request failed, retrying after sleeping"
    );
    sleep(duration).await;
}


#[cfg(test)]
mod tests {
    use super::test_server::{serve, Reply};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_client(base_url: &str) -> MapsClient {
        MapsClient::new("test-key")
            .unwrap()
            .with_base_url(base_url)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn endpoint_appends_key_last() {
        let client = MapsClient::new("abc").unwrap();
        let url = client
            .endpoint(
                "/maps/api/place/details/json",
                &[("place_id", "xyz".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://maps.googleapis.com/maps/api/place/details/json?place_id=xyz&key=abc"
        );
    }

    #[test]
    fn rejects_invalid_signing_secret() {
        assert!(MapsClient::new("abc")
            .unwrap()
            .with_signing_secret("not base64!")
            .is_err());
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let server = serve(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Reply::status(503)
            } else {
                Reply::bytes(b"ok")
            }
        })
        .await;
        let client = test_client(&server.base_url());
        let url = client.endpoint("/anything", &[]).unwrap();
        let res = client.get(&url, "test").await.unwrap();
        assert_eq!(res.bytes().await.unwrap().as_ref(), b"ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = serve(|_| Reply::status(403)).await;
        let client = test_client(&server.base_url());
        let url = client.endpoint("/anything", &[]).unwrap();
        assert!(client.get(&url, "test").await.is_err());
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let server = serve(|_| Reply::status(500)).await;
        let client = test_client(&server.base_url()).with_attempts(2);
        let url = client.endpoint("/anything", &[]).unwrap();
        assert!(client.get(&url, "test").await.is_err());
        assert_eq!(server.requests().len(), 2);
    }
}
