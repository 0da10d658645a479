use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{append_csv, progress_bar, FetchSummary, Outcome};
use crate::google_api::street_view::{self, CameraHeading, StreetViewRequest};
use crate::google_api::MapsClient;
use crate::location::{random_points_within, LatLon, Location};

pub const LOCATIONS_CSV: &str = "loc.csv";
// candidates drawn per round, as a multiple of the number of images wanted
const CANDIDATE_MULTIPLE: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct StreetViewOptions {
    /// Number of images wanted per location.
    pub n_images: usize,
    /// Radius in km around each location in which images are searched for.
    pub radius: f64,
    pub heading: CameraHeading,
    pub field_of_view: u32,
    pub pitch: i32,
    /// Radius in metres around each candidate point in which a panorama may be used.
    pub search_radius: u32,
    pub outdoor: bool,
    pub image_size: String,
    /// Gives up on a location after checking `n_images * limit` candidate points.
    pub limit: usize,
    pub concurrency: usize,
    pub verbose: bool,
}

impl Default for StreetViewOptions {
    fn default() -> Self {
        StreetViewOptions {
            n_images: 1,
            radius: 1.0,
            heading: CameraHeading::Random,
            field_of_view: 120,
            pitch: 0,
            search_radius: 10,
            outdoor: true,
            image_size: "640x640".to_string(),
            limit: 10,
            concurrency: 1,
            verbose: true,
        }
    }
}

impl StreetViewOptions {
    fn request(&self, location: LatLon, heading: Option<f64>) -> StreetViewRequest {
        StreetViewRequest {
            location,
            size: self.image_size.clone(),
            heading,
            field_of_view: self.field_of_view,
            pitch: self.pitch,
            search_radius: self.search_radius,
            outdoor: self.outdoor,
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageLocationRow {
    name: String,
    location: String,
}

/// Saves up to `n_images` street view images taken at random points around each location into
/// `dir/<id>/image<n>.png`, recording where each was taken in `dir/<id>/loc.csv`. Locations
/// that already hold `n_images` images are skipped; partially filled ones are topped up.
pub async fn get_street_view_images(
    client: &MapsClient,
    dir: &Path,
    locations: &[Location],
    options: &StreetViewOptions,
) -> Result<FetchSummary> {
    if options.n_images == 0 {
        bail!("number of images per location must be at least 1");
    }
    if !(options.radius > 0.0) {
        bail!("search area radius must be positive");
    }
    options
        .request(LatLon { lat: 0.0, lon: 0.0 }, None)
        .validate()
        .context("invalid street view image options")?;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let pb = progress_bar(locations.len(), options.verbose);
    let outcomes: Vec<Outcome> = stream::iter(locations)
        .map(|location| {
            let pb = pb.clone();
            let span = info_span!("location", id = %location.id);
            async move {
                let outcome = match collect_for_location(client, dir, location, options).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(error = %err, "failed to collect street view images");
                        Outcome::Failed
                    }
                };
                pb.inc(1);
                outcome
            }
            .instrument(span)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    pb.finish();

    let mut summary = FetchSummary::default();
    for outcome in outcomes {
        summary.record(outcome);
    }
    info!(%summary, "finished retrieving street view images");
    Ok(summary)
}

async fn collect_for_location(
    client: &MapsClient,
    dir: &Path,
    location: &Location,
    options: &StreetViewOptions,
) -> Result<Outcome> {
    let sub_dir = dir.join(&location.id);
    fs::create_dir_all(&sub_dir).await?;
    let existing = count_png_files(&sub_dir)?;
    if existing >= options.n_images {
        info!(existing, "location already has enough images, skipping");
        return Ok(Outcome::Skipped);
    }
    let needed = options.n_images - existing;

    let found = find_available_points(client, location.lat_lon, needed, options).await?;
    if found.len() < needed {
        warn!(
            found = found.len(),
            existing,
            tried = options.n_images * options.limit,
            "not enough street view panoramas around location"
        );
    }

    let mut rows = Vec::new();
    let mut next_index = 0;
    for point in found {
        let (name, path) = next_unused_image_path(&sub_dir, &mut next_index);
        let request = options.request(point, resolve_heading(options.heading));
        match street_view::get_image(client, &request).await {
            Ok(image) => {
                fs::write(&path, &image)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                debug!(path = %path.display(), "saved street view image");
                rows.push(ImageLocationRow {
                    name,
                    location: point.to_string(),
                });
            }
            Err(err) => warn!(error = %err, location = %point, "failed to get street view image"),
        }
    }
    append_csv(&sub_dir.join(LOCATIONS_CSV), &rows)?;

    if rows.is_empty() {
        Ok(Outcome::Failed)
    } else {
        info!(saved = rows.len(), "saved street view images");
        Ok(Outcome::Saved)
    }
}

/// Draws random candidate points around `center` in rounds and keeps those with a panorama
/// nearby, until `needed` are found or `n_images * limit` candidates have been checked.
async fn find_available_points(
    client: &MapsClient,
    center: LatLon,
    needed: usize,
    options: &StreetViewOptions,
) -> Result<Vec<LatLon>> {
    let per_round = (options.n_images as f64 * CANDIDATE_MULTIPLE).ceil() as usize;
    let max_candidates = options.n_images * options.limit;
    let mut found = Vec::new();
    let mut tried = 0;
    while found.len() < needed && tried < max_candidates {
        let candidates = {
            let mut rng = rand::thread_rng();
            random_points_within(&mut rng, center, per_round, options.radius)?
        };
        for candidate in candidates {
            if found.len() >= needed || tried >= max_candidates {
                break;
            }
            tried += 1;
            let metadata = street_view::get_metadata(
                client,
                candidate,
                options.search_radius,
                options.outdoor,
            )
            .await?;
            if metadata.is_available()? {
                found.push(candidate);
            }
        }
    }
    debug!(tried, found = found.len(), "checked candidate points for panoramas");
    Ok(found)
}

fn resolve_heading(heading: CameraHeading) -> Option<f64> {
    match heading {
        CameraHeading::Random => Some(rand::thread_rng().gen_range(0.0..360.0)),
        CameraHeading::TowardsLocation => None,
        CameraHeading::Fixed(degrees) => Some(degrees),
    }
}

fn next_unused_image_path(sub_dir: &Path, next_index: &mut usize) -> (String, PathBuf) {
    loop {
        let name = format!("image{}.png", next_index);
        let path = sub_dir.join(&name);
        *next_index += 1;
        if !path.exists() {
            return (name, path);
        }
    }
}

pub fn count_png_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "png") {
            count += 1;
        }
    }
    Ok(count)
}
