use anyhow::{anyhow, bail, Result};
use reqwest::Url;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::MapsClient;
use crate::location::LatLon;

pub const PATH: &str = "/maps/api/place/nearbysearch/json";
/// Google returns at most this many results per page.
pub const PAGE_SIZE: usize = 20;
const NEXT_PAGE_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct NearbySearchResponse {
    json: Value,
}

impl NearbySearchResponse {
    pub fn from_json(json: Value) -> Self {
        NearbySearchResponse { json }
    }

    pub fn status(&self) -> Result<&str> {
        self.json
            .get("status")
            .ok_or_else(|| anyhow!("Missing status key in nearby search response"))?
            .as_str()
            .ok_or_else(|| anyhow!("status value in nearby search response is not a string"))
    }

    pub fn next_page_token(&self) -> Option<&str> {
        self.json.get("next_page_token").and_then(Value::as_str)
    }

    pub fn results(&self) -> Result<&Vec<Value>> {
        self.json
            .get("results")
            .ok_or_else(|| anyhow!("Missing results key in nearby search response"))?
            .as_array()
            .ok_or_else(|| anyhow!("results value in nearby search response is not an array"))
    }

    /// Appends the results of `next` and takes over its `next_page_token`, dropping ours when
    /// `next` is the last page.
    pub fn concat_next_page(&mut self, next: NearbySearchResponse) -> Result<()> {
        let next_results = next.results()?.clone();
        let object = self
            .json
            .as_object_mut()
            .ok_or_else(|| anyhow!("nearby search response is not an object"))?;
        match next.next_page_token() {
            Some(token) => {
                object.insert("next_page_token".to_string(), Value::from(token));
            }
            None => {
                object.remove("next_page_token");
            }
        }
        object
            .entry("results")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| anyhow!("results value in nearby search response is not an array"))?
            .extend(next_results);
        Ok(())
    }

    /// Marks the response as the last page, so saved results no longer claim more pages exist.
    pub fn drop_next_page_token(&mut self) {
        if let Some(object) = self.json.as_object_mut() {
            object.remove("next_page_token");
        }
    }

    pub fn json(&self) -> &Value {
        &self.json
    }
}

pub fn url(client: &MapsClient, location: LatLon, radius_m: u32, keyword: &str) -> Result<Url> {
    client.endpoint(
        PATH,
        &[
            ("location", location.to_string()),
            ("radius", radius_m.to_string()),
            ("keyword", keyword.to_string()),
        ],
    )
}

pub fn next_page_url(client: &MapsClient, page_token: &str) -> Result<Url> {
    client.endpoint(PATH, &[("pagetoken", page_token.to_string())])
}

async fn fetch(client: &MapsClient, url: &Url) -> Result<NearbySearchResponse> {
    let res = client.get(url, "nearby_search::get").await?;
    debug!(status = %res.status(), "fetched nearby search page from API");
    let json = res.json::<Value>().await?;
    Ok(NearbySearchResponse { json })
}

#[instrument(skip(client))]
pub async fn get(
    client: &MapsClient,
    location: LatLon,
    radius_m: u32,
    keyword: &str,
) -> Result<NearbySearchResponse> {
    let resp = fetch(client, &url(client, location, radius_m, keyword)?).await?;
    info!(status = resp.status()?, "fetched nearby places from API");
    Ok(resp)
}

/// Requests the page behind `page_token`. A fresh token answers `INVALID_REQUEST` until it
/// becomes valid, so that status is retried a few times after waiting.
#[instrument(skip(client, page_token))]
pub async fn get_next_page(client: &MapsClient, page_token: &str) -> Result<NearbySearchResponse> {
    let url = next_page_url(client, page_token)?;
    let mut retries = 0;
    loop {
        sleep(client.page_token_delay()).await;
        let resp = fetch(client, &url).await?;
        if resp.status()? != "INVALID_REQUEST" || retries >= NEXT_PAGE_RETRIES {
            info!(status = resp.status()?, retries, "fetched next page of nearby places");
            return Ok(resp);
        }
        retries += 1;
        debug!(retries, "page token is not valid yet");
    }
}

/// Runs a nearby search and follows `next_page_token`s until the last page. A page that fails
/// ends pagination but keeps the results gathered so far.
#[instrument(skip(client))]
pub async fn get_all_pages(
    client: &MapsClient,
    location: LatLon,
    radius_m: u32,
    keyword: &str,
) -> Result<NearbySearchResponse> {
    let mut resp = get(client, location, radius_m, keyword).await?;
    while let Some(token) = resp.next_page_token().map(str::to_string) {
        if let Err(err) = append_next_page(client, &mut resp, &token).await {
            warn!(error = %err, "failed to get next page, keeping results so far");
            resp.drop_next_page_token();
            break;
        }
    }
    Ok(resp)
}

async fn append_next_page(
    client: &MapsClient,
    resp: &mut NearbySearchResponse,
    token: &str,
) -> Result<()> {
    let next = get_next_page(client, token).await?;
    let status = next.status()?;
    if status != "OK" {
        bail!("next page returned status {}", status);
    }
    resp.concat_next_page(next)
}
