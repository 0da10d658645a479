use anyhow::{bail, Result};
use reqwest::Url;
use tracing::{info, instrument};

use super::MapsClient;
use crate::location::LatLon;

pub const PATH: &str = "/maps/api/staticmap";
pub const MAX_SIZE: u32 = 640;
pub const MAX_ZOOM: u8 = 21;
// Web Mercator ground resolution at the equator for zoom 0, in metres per pixel
const EQUATOR_METERS_PER_PIXEL: f64 = 156543.03392;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLevel {
    pub zoom: u8,
    /// Horizontal ground distance covered by an image at this zoom, in km.
    pub horizontal_coverage: f64,
}

/// Horizontal coverage in km of an image `horizontal_size` pixels wide centered at `lat`.
pub fn horizontal_coverage_km(lat: f64, zoom: u8, horizontal_size: u32) -> f64 {
    let meters_per_pixel =
        EQUATOR_METERS_PER_PIXEL * lat.to_radians().cos() / 2f64.powi(zoom as i32);
    meters_per_pixel * horizontal_size as f64 / 1000.0
}

/// Finds the zoom level whose image coverage is closest to `horizontal_coverage` km, comparing
/// the area ratios of the two zoom levels that bracket the target.
pub fn find_zoom_level(lat: f64, horizontal_coverage: f64, horizontal_size: u32) -> ZoomLevel {
    let mut previous: Option<ZoomLevel> = None;
    for zoom in 0..=MAX_ZOOM {
        let coverage = horizontal_coverage_km(lat, zoom, horizontal_size);
        let current = ZoomLevel {
            zoom,
            horizontal_coverage: coverage,
        };
        if coverage > horizontal_coverage {
            previous = Some(current);
            continue;
        }
        return match previous {
            None => current,
            Some(previous) => {
                let smaller_ratio = (horizontal_coverage / coverage).powi(2);
                let larger_ratio = (previous.horizontal_coverage / horizontal_coverage).powi(2);
                if smaller_ratio <= larger_ratio {
                    current
                } else {
                    previous
                }
            }
        };
    }
    ZoomLevel {
        zoom: MAX_ZOOM,
        horizontal_coverage: horizontal_coverage_km(lat, MAX_ZOOM, horizontal_size),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticMapRequest {
    pub center: LatLon,
    pub zoom: u8,
    pub width: u32,
    pub height: u32,
    pub scale: u8,
    pub format: String,
}

impl StaticMapRequest {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.width > MAX_SIZE || self.height == 0 || self.height > MAX_SIZE {
            bail!(
                "image size {}x{} must be between 1 and {} pixels on each side",
                self.width,
                self.height,
                MAX_SIZE
            );
        }
        if !matches!(self.scale, 1 | 2) {
            bail!("image scale must be 1 or 2, got {}", self.scale);
        }
        if self.zoom > MAX_ZOOM {
            bail!("zoom level must be at most {}, got {}", MAX_ZOOM, self.zoom);
        }
        Ok(())
    }
}

pub fn url(client: &MapsClient, request: &StaticMapRequest) -> Result<Url> {
    client.signed_endpoint(
        PATH,
        &[
            ("center", request.center.to_string()),
            ("zoom", request.zoom.to_string()),
            ("size", format!("{}x{}", request.width, request.height)),
            ("scale", request.scale.to_string()),
            ("format", request.format.clone()),
            ("maptype", "satellite".to_string()),
        ],
    )
}

#[instrument(skip(client))]
pub async fn get(client: &MapsClient, request: &StaticMapRequest) -> Result<Vec<u8>> {
    request.validate()?;
    let res = client.get(&url(client, request)?, "static_map::get").await?;
    info!(status = %res.status(), "fetched satellite image from API");
    Ok(res.bytes().await?.to_vec())
}
