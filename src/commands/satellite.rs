use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};

use super::{append_csv, progress_bar, FetchSummary, Outcome};
use crate::google_api::static_map::{self, find_zoom_level, StaticMapRequest, MAX_SIZE};
use crate::google_api::MapsClient;
use crate::location::{LatLon, Location};

pub const COVERAGE_CSV: &str = "image_coverage.csv";

#[derive(Debug, Clone)]
pub struct SatelliteOptions {
    /// Ideal horizontal ground coverage of each image in km. Images get the zoom level that
    /// comes closest to it.
    pub horizontal_coverage: f64,
    /// Image width in pixels, at most 640.
    pub horizontal_size: u32,
    /// Image height as a fraction of its width.
    pub image_ratio: f64,
    pub scale: u8,
    pub format: String,
    pub concurrency: usize,
    pub verbose: bool,
}

impl Default for SatelliteOptions {
    fn default() -> Self {
        SatelliteOptions {
            horizontal_coverage: 2.0,
            horizontal_size: MAX_SIZE,
            image_ratio: 1.0,
            scale: 1,
            format: "png".to_string(),
            concurrency: 1,
            verbose: true,
        }
    }
}

impl SatelliteOptions {
    fn vertical_size(&self) -> u32 {
        (self.horizontal_size as f64 * self.image_ratio).round() as u32
    }

    fn request(&self, center: LatLon, zoom: u8) -> StaticMapRequest {
        StaticMapRequest {
            center,
            zoom,
            width: self.horizontal_size,
            height: self.vertical_size(),
            scale: self.scale,
            format: self.format.clone(),
        }
    }
}

/// File extension of images returned for a Static Maps `format`.
pub fn image_extension(format: &str) -> Result<&'static str> {
    match format {
        "png" | "png8" | "png32" => Ok("png"),
        "gif" => Ok("gif"),
        "jpg" | "jpg-baseline" => Ok("jpg"),
        _ => bail!("unsupported image format {:?}", format),
    }
}

#[derive(Debug, Serialize)]
struct CoverageRow<'a> {
    id: &'a str,
    actual_coverage: String,
}

/// Saves a satellite image centered on each location to `dir/<id>.<ext>` and records the
/// ground area each new image covers in `dir/image_coverage.csv`. Images that already exist
/// are not requested again.
pub async fn get_satellite_images(
    client: &MapsClient,
    dir: &Path,
    locations: &[Location],
    options: &SatelliteOptions,
) -> Result<FetchSummary> {
    let extension = image_extension(&options.format)?;
    if !(options.horizontal_coverage > 0.0) {
        bail!("horizontal coverage must be positive");
    }
    options
        .request(LatLon { lat: 0.0, lon: 0.0 }, 0)
        .validate()
        .context("invalid satellite image options")?;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let pb = progress_bar(locations.len(), options.verbose);
    let results: Vec<(usize, Outcome, f64)> = stream::iter(locations.iter().enumerate())
        .map(|(index, location)| {
            let pb = pb.clone();
            let span = info_span!("location", id = %location.id);
            async move {
                let level = find_zoom_level(
                    location.lat_lon.lat,
                    options.horizontal_coverage,
                    options.horizontal_size,
                );
                let path = dir.join(format!("{}.{}", location.id, extension));
                let outcome = if path.exists() {
                    info!("image already exists, skipping");
                    Outcome::Skipped
                } else {
                    let request = options.request(location.lat_lon, level.zoom);
                    match save_image(client, &request, &path).await {
                        Ok(()) => Outcome::Saved,
                        Err(err) => {
                            warn!(error = %err, "failed to save satellite image");
                            Outcome::Failed
                        }
                    }
                };
                pb.inc(1);
                (index, outcome, level.horizontal_coverage)
            }
            .instrument(span)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    pb.finish();

    let mut results = results;
    results.sort_by_key(|(index, _, _)| *index);
    let mut summary = FetchSummary::default();
    let mut rows = Vec::new();
    for (index, outcome, coverage) in results {
        summary.record(outcome);
        if outcome == Outcome::Saved {
            rows.push(CoverageRow {
                id: &locations[index].id,
                actual_coverage: format!("{}x{}", coverage, coverage * options.image_ratio),
            });
        }
    }
    append_csv(&dir.join(COVERAGE_CSV), &rows)?;
    info!(%summary, "finished retrieving satellite images");
    Ok(summary)
}

async fn save_image(client: &MapsClient, request: &StaticMapRequest, path: &Path) -> Result<()> {
    let image = static_map::get(client, request).await?;
    fs::write(path, &image)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(bytes = image.len(), path = %path.display(), "saved satellite image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::test_server::{serve, Reply};
    use tempfile::tempdir;

    fn locations() -> Vec<Location> {
        vec![
            Location::new("a", LatLon::new(0.0, 0.0).unwrap()),
            Location::new("b", LatLon::new(40.7, -74.0).unwrap()),
        ]
    }

    #[test]
    fn maps_formats_to_extensions() {
        assert_eq!(image_extension("png32").unwrap(), "png");
        assert_eq!(image_extension("jpg-baseline").unwrap(), "jpg");
        assert!(image_extension("bmp").is_err());
    }

    #[tokio::test]
    async fn saves_images_and_skips_existing_ones() {
        let server = serve(|_| Reply::bytes(b"image")).await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();
        let dir = tempdir().unwrap();
        let out = dir.path().join("satellite");
        let options = SatelliteOptions {
            concurrency: 2,
            verbose: false,
            ..SatelliteOptions::default()
        };

        let summary = get_satellite_images(&client, &out, &locations(), &options)
            .await
            .unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(std::fs::read(out.join("a.png")).unwrap(), b"image");
        assert!(out.join("b.png").exists());

        let coverage = std::fs::read_to_string(out.join(COVERAGE_CSV)).unwrap();
        let lines: Vec<&str> = coverage.lines().collect();
        assert_eq!(lines[0], "id,actual_coverage");
        assert!(lines[1].starts_with("a,1.528740565"));
        assert!(lines[2].starts_with("b,"));

        let more = vec![
            Location::new("a", LatLon::new(0.0, 0.0).unwrap()),
            Location::new("c", LatLon::new(10.0, 10.0).unwrap()),
        ];
        let summary = get_satellite_images(&client, &out, &more, &options)
            .await
            .unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(server.requests().len(), 3);

        let coverage = std::fs::read_to_string(out.join(COVERAGE_CSV)).unwrap();
        let lines: Vec<&str> = coverage.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("c,"));
    }

    #[tokio::test]
    async fn rejects_invalid_options_before_any_request() {
        let server = serve(|_| Reply::bytes(b"image")).await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();
        let dir = tempdir().unwrap();
        let out = dir.path().join("satellite");
        let invalid = [
            SatelliteOptions {
                horizontal_size: 1000,
                ..SatelliteOptions::default()
            },
            SatelliteOptions {
                image_ratio: 2.0,
                ..SatelliteOptions::default()
            },
            SatelliteOptions {
                image_ratio: 0.0,
                ..SatelliteOptions::default()
            },
            SatelliteOptions {
                scale: 3,
                ..SatelliteOptions::default()
            },
            SatelliteOptions {
                horizontal_coverage: f64::NAN,
                ..SatelliteOptions::default()
            },
        ];
        for options in invalid {
            let options = SatelliteOptions {
                verbose: false,
                ..options
            };
            assert!(get_satellite_images(&client, &out, &locations(), &options)
                .await
                .is_err());
        }
        assert!(server.requests().is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn failed_downloads_are_counted_not_fatal() {
        let server = serve(|target| {
            if target.contains("center=0%2C0") {
                Reply::status(403)
            } else {
                Reply::bytes(b"image")
            }
        })
        .await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();
        let dir = tempdir().unwrap();
        let options = SatelliteOptions {
            verbose: false,
            ..SatelliteOptions::default()
        };
        let summary = get_satellite_images(&client, dir.path(), &locations(), &options)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.saved, 1);
        assert!(!dir.path().join("a.png").exists());
    }
}
