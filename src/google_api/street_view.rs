use anyhow::{anyhow, bail, Result};
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::MapsClient;
use crate::location::LatLon;

pub const IMAGE_PATH: &str = "/maps/api/streetview";
pub const METADATA_PATH: &str = "/maps/api/streetview/metadata";
pub const MAX_FIELD_OF_VIEW: u32 = 120;

/// Compass heading of the street view camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraHeading {
    /// A heading drawn uniformly from [0, 360) for each image.
    Random,
    /// No heading parameter, so the camera points towards the requested location.
    TowardsLocation,
    /// A fixed heading in degrees, 0 and 360 being north, 90 east.
    Fixed(f64),
}

impl CameraHeading {
    /// Parses `random`, `location`, or a number of degrees.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(CameraHeading::Random),
            "location" => Ok(CameraHeading::TowardsLocation),
            degrees => {
                let degrees = degrees
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid camera heading {:?}", s))?;
                if !(0.0..=360.0).contains(&degrees) {
                    bail!("camera heading must be between 0 and 360, got {}", degrees);
                }
                Ok(CameraHeading::Fixed(degrees))
            }
        }
    }
}

pub struct MetadataResponse {
    json: Value,
}

impl MetadataResponse {
    pub fn status(&self) -> Result<&str> {
        self.json
            .get("status")
            .ok_or_else(|| anyhow!("Missing status key in street view metadata response"))?
            .as_str()
            .ok_or_else(|| anyhow!("status value in street view metadata response is not a string"))
    }

    /// Whether a panorama exists near the requested location.
    pub fn is_available(&self) -> Result<bool> {
        Ok(self.status()? == "OK")
    }
}

pub fn metadata_url(
    client: &MapsClient,
    location: LatLon,
    search_radius: u32,
    outdoor: bool,
) -> Result<Url> {
    let mut params = vec![("location", location.to_string())];
    if outdoor {
        params.push(("source", "outdoor".to_string()));
    }
    params.push(("radius", search_radius.to_string()));
    client.endpoint(METADATA_PATH, &params)
}

/// Metadata requests are not billed, so they are used to probe for panoramas before paying for
/// an image.
#[instrument(skip(client))]
pub async fn get_metadata(
    client: &MapsClient,
    location: LatLon,
    search_radius: u32,
    outdoor: bool,
) -> Result<MetadataResponse> {
    let url = metadata_url(client, location, search_radius, outdoor)?;
    let res = client.get(&url, "street_view::get_metadata").await?;
    debug!(status = %res.status(), "fetched street view metadata from API");
    let json = res.json::<Value>().await?;
    Ok(MetadataResponse { json })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreetViewRequest {
    pub location: LatLon,
    pub size: String,
    /// Resolved heading in degrees; `None` points the camera at `location`.
    pub heading: Option<f64>,
    pub field_of_view: u32,
    pub pitch: i32,
    pub search_radius: u32,
    pub outdoor: bool,
}

impl StreetViewRequest {
    pub fn validate(&self) -> Result<()> {
        if self.field_of_view == 0 || self.field_of_view > MAX_FIELD_OF_VIEW {
            bail!(
                "field of view must be between 1 and {}, got {}",
                MAX_FIELD_OF_VIEW,
                self.field_of_view
            );
        }
        if !(-90..=90).contains(&self.pitch) {
            bail!("pitch must be between -90 and 90, got {}", self.pitch);
        }
        let (width, height) = self
            .size
            .split_once('x')
            .ok_or_else(|| anyhow!("image size {:?} must look like 640x640", self.size))?;
        for side in [width, height] {
            let side: u32 = side
                .parse()
                .map_err(|_| anyhow!("image size {:?} must look like 640x640", self.size))?;
            if side == 0 || side > 640 {
                bail!("image size {:?} must be at most 640x640", self.size);
            }
        }
        Ok(())
    }
}

pub fn image_url(client: &MapsClient, request: &StreetViewRequest) -> Result<Url> {
    let mut params = vec![
        ("location", request.location.to_string()),
        ("size", request.size.clone()),
    ];
    if let Some(heading) = request.heading {
        params.push(("heading", heading.to_string()));
    }
    params.push(("fov", request.field_of_view.to_string()));
    params.push(("pitch", request.pitch.to_string()));
    params.push(("radius", request.search_radius.to_string()));
    if request.outdoor {
        params.push(("source", "outdoor".to_string()));
    }
    client.signed_endpoint(IMAGE_PATH, &params)
}

#[instrument(skip(client))]
pub async fn get_image(client: &MapsClient, request: &StreetViewRequest) -> Result<Vec<u8>> {
    request.validate()?;
    let url = image_url(client, request)?;
    let res = client.get(&url, "street_view::get_image").await?;
    info!(status = %res.status(), "fetched street view image from API");
    Ok(res.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::test_server::{serve, Reply};
    use serde_json::json;

    fn request() -> StreetViewRequest {
        StreetViewRequest {
            location: LatLon::new(1.5, 2.5).unwrap(),
            size: "640x640".to_string(),
            heading: Some(90.0),
            field_of_view: 120,
            pitch: 0,
            search_radius: 10,
            outdoor: true,
        }
    }

    #[test]
    fn parses_camera_heading() {
        assert_eq!(CameraHeading::parse("random").unwrap(), CameraHeading::Random);
        assert_eq!(
            CameraHeading::parse("location").unwrap(),
            CameraHeading::TowardsLocation
        );
        assert_eq!(
            CameraHeading::parse("270").unwrap(),
            CameraHeading::Fixed(270.0)
        );
        assert!(CameraHeading::parse("361").is_err());
        assert!(CameraHeading::parse("north").is_err());
    }

    #[test]
    fn builds_image_url() {
        let client = MapsClient::new("key").unwrap();
        let url = image_url(&client, &request()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://maps.googleapis.com/maps/api/streetview?location=1.5%2C2.5&size=640x640&heading=90&fov=120&pitch=0&radius=10&source=outdoor&key=key"
        );

        let mut towards = request();
        towards.heading = None;
        towards.outdoor = false;
        let url = image_url(&client, &towards).unwrap();
        assert!(!url.as_str().contains("heading="));
        assert!(!url.as_str().contains("source="));
    }

    #[test]
    fn signs_image_url_when_secret_is_configured() {
        let client = MapsClient::new("key")
            .unwrap()
            .with_signing_secret("vNIXE0xscrmjlyV-12Nj_BvUPaw=")
            .unwrap();
        let url = image_url(&client, &request()).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("&key=key&signature="));
    }

    #[test]
    fn validates_image_request() {
        assert!(request().validate().is_ok());
        let mut wide = request();
        wide.field_of_view = 121;
        assert!(wide.validate().is_err());
        let mut steep = request();
        steep.pitch = -91;
        assert!(steep.validate().is_err());
        let mut big = request();
        big.size = "800x600".to_string();
        assert!(big.validate().is_err());
    }

    #[tokio::test]
    async fn reports_panorama_availability() {
        let server = serve(|target| {
            if target.contains("location=0%2C0") {
                Reply::json(json!({ "status": "ZERO_RESULTS" }))
            } else {
                Reply::json(json!({ "status": "OK", "pano_id": "abc" }))
            }
        })
        .await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();

        let found = get_metadata(&client, LatLon::new(1.0, 1.0).unwrap(), 10, true)
            .await
            .unwrap();
        assert!(found.is_available().unwrap());
        let missing = get_metadata(&client, LatLon::new(0.0, 0.0).unwrap(), 10, true)
            .await
            .unwrap();
        assert!(!missing.is_available().unwrap());
        assert!(server.requests()[0].starts_with("/maps/api/streetview/metadata?"));
    }
}
