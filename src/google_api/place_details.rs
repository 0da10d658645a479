use anyhow::{anyhow, Result};
use reqwest::Url;
use serde_json::Value;
use tracing::{info, instrument};

use super::MapsClient;

pub const PATH: &str = "/maps/api/place/details/json";
/// `review` puts the request in the Atmosphere Data billing SKU.
pub const FIELDS: &str = "name,place_id,type,review";

pub struct PlaceDetailsResponse {
    json: Value,
}

impl PlaceDetailsResponse {
    pub fn status(&self) -> Result<&str> {
        self.json
            .get("status")
            .ok_or_else(|| anyhow!("Missing status key in place details response"))?
            .as_str()
            .ok_or_else(|| anyhow!("status value in place details response is not a string"))
    }

    pub fn json(&self) -> &Value {
        &self.json
    }
}

pub fn url(client: &MapsClient, place_id: &str) -> Result<Url> {
    client.endpoint(
        PATH,
        &[
            ("place_id", place_id.to_string()),
            ("fields", FIELDS.to_string()),
        ],
    )
}

#[instrument(skip(client))]
pub async fn get(client: &MapsClient, place_id: &str) -> Result<PlaceDetailsResponse> {
    let res = client
        .get(&url(client, place_id)?, "place_details::get")
        .await?;
    info!(status = %res.status(), "fetched place details from API");
    let json = res.json::<Value>().await?;
    Ok(PlaceDetailsResponse { json })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::test_server::{serve, Reply};
    use serde_json::json;

    #[test]
    fn builds_details_url() {
        let client = MapsClient::new("key").unwrap();
        assert_eq!(
            url(&client, "ChIJN1t_tDeuEmsRUsoyG83frY4").unwrap().as_str(),
            "https://maps.googleapis.com/maps/api/place/details/json?place_id=ChIJN1t_tDeuEmsRUsoyG83frY4&fields=name%2Cplace_id%2Ctype%2Creview&key=key"
        );
    }

    #[tokio::test]
    async fn fetches_details() {
        let server = serve(|_| {
            Reply::json(json!({
                "status": "OK",
                "result": { "name": "Cafe", "place_id": "p1", "reviews": [] },
            }))
        })
        .await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();
        let resp = get(&client, "p1").await.unwrap();
        assert_eq!(resp.status().unwrap(), "OK");
        assert_eq!(resp.json()["result"]["name"], "Cafe");
    }
}
