use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use super::{default_csv_path, progress_bar, FetchSummary, Outcome, TableStatus};
use crate::google_api::place_details;
use crate::google_api::MapsClient;

#[derive(Debug, Clone)]
pub struct ReviewsOptions {
    pub concurrency: usize,
    pub verbose: bool,
}

impl Default for ReviewsOptions {
    fn default() -> Self {
        ReviewsOptions {
            concurrency: 1,
            verbose: true,
        }
    }
}

/// Saves the Place Details response (name, type and reviews) of each place to
/// `dir/<place_id>.json`, skipping places that were already retrieved.
pub async fn get_reviews(
    client: &MapsClient,
    dir: &Path,
    place_ids: &[String],
    options: &ReviewsOptions,
) -> Result<FetchSummary> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let pb = progress_bar(place_ids.len(), options.verbose);
    let outcomes: Vec<Outcome> = stream::iter(place_ids)
        .map(|place_id| {
            let pb = pb.clone();
            let span = info_span!("place", place_id = %place_id);
            async move {
                let outcome = save_place_details(client, dir, place_id).await;
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
    info!(%summary, "finished retrieving reviews");
    Ok(summary)
}

async fn save_place_details(client: &MapsClient, dir: &Path, place_id: &str) -> Outcome {
    let path = dir.join(format!("{}.json", place_id));
    if path.exists() {
        debug!(path = %path.display(), "already exists, skipping");
        return Outcome::Skipped;
    }
    let resp = match place_details::get(client, place_id).await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(error = %err, "failed to get place details");
            return Outcome::Failed;
        }
    };
    match resp.status() {
        Ok("OK") => {}
        Ok(status) => {
            warn!(status, "place details request did not succeed");
            return Outcome::Failed;
        }
        Err(err) => {
            warn!(error = %err, "malformed place details response");
            return Outcome::Failed;
        }
    }
    let written = match serde_json::to_vec(resp.json()) {
        Ok(bytes) => fs::write(&path, bytes).await.map_err(anyhow::Error::from),
        Err(err) => Err(err.into()),
    };
    match written {
        Ok(()) => {
            info!(path = %path.display(), "saved place details");
            Outcome::Saved
        }
        Err(err) => {
            warn!(error = %err, "failed to save place details");
            Outcome::Failed
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaceIdRecord {
    place_id: String,
}

/// Reads the unique `place_id`s of a CSV file such as the one written by
/// [`super::create_csv_nearby_places`], in order of first appearance.
#[instrument]
pub fn read_place_ids(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut seen = HashSet::new();
    let mut place_ids = Vec::new();
    for record in reader.deserialize::<PlaceIdRecord>() {
        let record = record?;
        if seen.insert(record.place_id.clone()) {
            place_ids.push(record.place_id);
        }
    }
    info!(num_place_ids = place_ids.len(), "read place ids");
    Ok(place_ids)
}

#[derive(Debug, Deserialize)]
struct DetailsFile {
    result: Option<DetailsResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    place_id: String,
    name: String,
    reviews: Option<Vec<Review>>,
}

#[derive(Debug, Deserialize)]
struct Review {
    #[serde(default)]
    text: String,
    rating: u8,
    time: i64,
    language: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReviewRow {
    place_id: String,
    place_name: String,
    review_text: String,
    review_rating: u8,
    review_time: i64,
    review_language: String,
}

const CSV_HEADER: [&str; 6] = [
    "place_id",
    "place_name",
    "review_text",
    "review_rating",
    "review_time",
    "review_language",
];

/// Flattens the directory written by [`get_reviews`] into one CSV row per review. Writes to
/// `output`, or `<dir>.csv` by default, unless that file already exists.
pub fn create_csv_reviews(dir: &Path, output: Option<&Path>) -> Result<TableStatus> {
    let path = output.map_or_else(|| default_csv_path(dir), Path::to_path_buf);
    if path.exists() {
        warn!(path = %path.display(), "CSV file already exists");
        return Ok(TableStatus::AlreadyExists { path });
    }

    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let file_path = entry?.path();
        let is_hidden = file_path
            .file_name()
            .map_or(true, |name| name.to_string_lossy().starts_with('.'));
        if !is_hidden && file_path.extension().map_or(false, |ext| ext == "json") {
            files.push(file_path);
        }
    }
    files.sort();

    let mut rows = Vec::new();
    for file_path in files {
        let contents = std::fs::read(&file_path)
            .with_context(|| format!("failed to read {}", file_path.display()))?;
        let details: DetailsFile = match serde_json::from_slice(&contents) {
            Ok(details) => details,
            Err(err) => {
                warn!(path = %file_path.display(), error = %err, "skipping unreadable place details");
                continue;
            }
        };
        let result = match details.result {
            Some(result) => result,
            None => continue,
        };
        let reviews = match result.reviews {
            Some(reviews) => reviews,
            None => {
                debug!(place_id = %result.place_id, "place has no reviews");
                continue;
            }
        };
        for review in reviews {
            rows.push(ReviewRow {
                place_id: result.place_id.clone(),
                place_name: result.name.clone(),
                review_text: review.text,
                review_rating: review.rating,
                review_time: review.time,
                review_language: review.language.unwrap_or_else(|| "na".to_string()),
            });
        }
    }

    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record(CSV_HEADER)?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(rows = rows.len(), path = %path.display(), "wrote reviews CSV");
    Ok(TableStatus::Written {
        path,
        rows: rows.len(),
    })
}
