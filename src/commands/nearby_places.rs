use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{default_csv_path, progress_bar, FetchSummary, Outcome, TableStatus};
use crate::google_api::nearby_search;
use crate::google_api::MapsClient;
use crate::location::Location;
use crate::place_types::default_place_types;

#[derive(Debug, Clone)]
pub struct NearbyPlacesOptions {
    /// Search radius in km.
    pub radius: f64,
    /// Keywords to search for, usually Google place types.
    pub place_types: Vec<String>,
    pub concurrency: usize,
    pub verbose: bool,
}

impl Default for NearbyPlacesOptions {
    fn default() -> Self {
        NearbyPlacesOptions {
            radius: 1.0,
            place_types: default_place_types(),
            concurrency: 1,
            verbose: true,
        }
    }
}

/// Searches for places of each type around each location and saves the concatenated pages of
/// results to `dir/<id>/<type>.json`. Searches whose file already exists are not repeated.
///
/// The search is by keyword, so saved results are not guaranteed to have the searched type;
/// check each result's `types` (as [`create_csv_nearby_places`] does).
pub async fn get_nearby_places(
    client: &MapsClient,
    dir: &Path,
    locations: &[Location],
    options: &NearbyPlacesOptions,
) -> Result<FetchSummary> {
    if !(options.radius > 0.0) {
        bail!("search radius must be positive");
    }
    let radius_m = (options.radius * 1000.0).round() as u32;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let pb = progress_bar(locations.len(), options.verbose);
    let summaries: Vec<FetchSummary> = stream::iter(locations)
        .map(|location| {
            let pb = pb.clone();
            let span = info_span!("location", id = %location.id);
            async move {
                let mut summary = FetchSummary::default();
                let sub_dir = dir.join(&location.id);
                if let Err(err) = fs::create_dir_all(&sub_dir).await {
                    warn!(error = %err, "failed to create directory for location");
                    summary.failed += options.place_types.len();
                    pb.inc(1);
                    return summary;
                }
                for place_type in &options.place_types {
                    let outcome =
                        search_place_type(client, &sub_dir, location, place_type, radius_m)
                            .instrument(info_span!("place_type", place_type = %place_type))
                            .await;
                    summary.record(outcome);
                }
                info!(%summary, "finished retrieving nearby places for location");
                pb.inc(1);
                summary
            }
            .instrument(span)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;
    pb.finish();

    let mut summary = FetchSummary::default();
    for location_summary in summaries {
        summary.saved += location_summary.saved;
        summary.skipped += location_summary.skipped;
        summary.failed += location_summary.failed;
    }
    info!(%summary, "finished retrieving nearby places");
    Ok(summary)
}

async fn search_place_type(
    client: &MapsClient,
    sub_dir: &Path,
    location: &Location,
    place_type: &str,
    radius_m: u32,
) -> Outcome {
    let path = sub_dir.join(format!("{}.json", place_type));
    if path.exists() {
        debug!(path = %path.display(), "already exists, skipping");
        return Outcome::Skipped;
    }
    let resp =
        match nearby_search::get_all_pages(client, location.lat_lon, radius_m, place_type).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "failed to search nearby places");
                return Outcome::Failed;
            }
        };
    let status = match resp.status() {
        Ok(status) => status,
        Err(err) => {
            warn!(error = %err, "malformed nearby search response");
            return Outcome::Failed;
        }
    };
    match status {
        "OK" | "ZERO_RESULTS" => match write_json(&path, resp.json()).await {
            Ok(()) => {
                info!(status, path = %path.display(), "saved nearby places");
                Outcome::Saved
            }
            Err(err) => {
                warn!(error = %err, "failed to save nearby places");
                Outcome::Failed
            }
        },
        status => {
            warn!(status, "nearby search did not succeed");
            Outcome::Failed
        }
    }
}

async fn write_json(path: &Path, json: &serde_json::Value) -> Result<()> {
    fs::write(path, serde_json::to_vec(json)?)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

#[derive(Debug, Deserialize)]
struct SearchFile {
    #[serde(default)]
    results: Vec<PlaceResult>,
}

#[derive(Debug, Deserialize)]
struct PlaceResult {
    name: String,
    place_id: String,
    #[serde(default)]
    types: Vec<String>,
    price_level: Option<u8>,
    rating: Option<f64>,
    user_ratings_total: Option<u64>,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Coordinates,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    lat: f64,
    lng: f64,
}

const CSV_HEADER: [&str; 8] = [
    "id",
    "type",
    "name",
    "place_id",
    "price_level",
    "rating",
    "n_rating",
    "loc",
];

#[derive(Debug, Serialize)]
struct NearbyPlaceRow<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    place_type: &'a str,
    name: String,
    place_id: String,
    price_level: Option<u8>,
    rating: Option<f64>,
    n_rating: Option<u64>,
    loc: String,
}

/// Flattens the directory written by [`get_nearby_places`] into one CSV row per place and
/// searched type, keeping only places that actually have that type. Writes to `output`, or
/// `<dir>.csv` by default, unless that file already exists.
pub fn create_csv_nearby_places(
    dir: &Path,
    place_types: &[String],
    output: Option<&Path>,
) -> Result<TableStatus> {
    let path = output.map_or_else(|| default_csv_path(dir), Path::to_path_buf);
    if path.exists() {
        warn!(path = %path.display(), "CSV file already exists");
        return Ok(TableStatus::AlreadyExists { path });
    }

    let mut ids = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            ids.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    ids.sort();

    let mut rows = Vec::new();
    for id in &ids {
        for place_type in place_types {
            let file_path = dir.join(id).join(format!("{}.json", place_type));
            if !file_path.exists() {
                debug!(path = %file_path.display(), "no search results saved, skipping");
                continue;
            }
            let contents = std::fs::read(&file_path)
                .with_context(|| format!("failed to read {}", file_path.display()))?;
            let search: SearchFile = serde_json::from_slice(&contents)
                .with_context(|| format!("failed to parse {}", file_path.display()))?;
            for place in search.results {
                if !place.types.iter().any(|t| t == place_type) {
                    continue;
                }
                let rating = match place.user_ratings_total {
                    Some(0) => None,
                    _ => place.rating,
                };
                rows.push(NearbyPlaceRow {
                    id,
                    place_type,
                    name: place.name,
                    place_id: place.place_id,
                    price_level: place.price_level,
                    rating,
                    n_rating: place.user_ratings_total,
                    loc: format!(
                        "{},{}",
                        place.geometry.location.lat, place.geometry.location.lng
                    ),
                });
            }
        }
    }

    // nothing is written until every file has parsed
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if rows.is_empty() {
        writer.write_record(CSV_HEADER)?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(rows = rows.len(), path = %path.display(), "wrote nearby places CSV");
    Ok(TableStatus::Written {
        path,
        rows: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::test_server::{serve, Reply};
    use crate::location::LatLon;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn place(
        name: &str,
        types: &[&str],
        rating: Option<f64>,
        n_rating: Option<u64>,
    ) -> serde_json::Value {
        let mut place = json!({
            "name": name,
            "place_id": format!("id-{}", name),
            "types": types,
            "geometry": { "location": { "lat": 1.5, "lng": -2.25 } },
        });
        if let Some(rating) = rating {
            place["rating"] = json!(rating);
        }
        if let Some(n_rating) = n_rating {
            place["user_ratings_total"] = json!(n_rating);
        }
        place
    }

    #[tokio::test]
    async fn saves_successful_and_empty_searches_only() {
        let server = serve(|target| {
            if target.contains("keyword=cafe") {
                Reply::json(json!({
                    "status": "OK",
                    "results": [place("Beans", &["cafe"], Some(4.5), Some(10))],
                }))
            } else if target.contains("keyword=zoo") {
                Reply::json(json!({ "status": "ZERO_RESULTS", "results": [] }))
            } else {
                Reply::json(json!({ "status": "OVER_QUERY_LIMIT", "results": [] }))
            }
        })
        .await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap()
            .with_page_token_delay(Duration::from_millis(1));
        let dir = tempdir().unwrap();
        let out = dir.path().join("nearby");
        let options = NearbyPlacesOptions {
            radius: 0.5,
            place_types: vec!["cafe".to_string(), "zoo".to_string(), "bank".to_string()],
            concurrency: 1,
            verbose: false,
        };
        let locations = vec![Location::new("a", LatLon::new(1.0, 2.0).unwrap())];

        let summary = get_nearby_places(&client, &out, &locations, &options)
            .await
            .unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failed, 1);
        assert!(out.join("a").join("cafe.json").exists());
        assert!(out.join("a").join("zoo.json").exists());
        assert!(!out.join("a").join("bank.json").exists());
        assert!(server.requests()[0].contains("radius=500"));

        let summary = get_nearby_places(&client, &out, &locations, &options)
            .await
            .unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn rejects_non_positive_radius() {
        let server = serve(|_| Reply::json(json!({ "status": "OK", "results": [] }))).await;
        let client = MapsClient::new("key")
            .unwrap()
            .with_base_url(&server.base_url())
            .unwrap();
        let dir = tempdir().unwrap();
        let locations = vec![Location::new("a", LatLon::new(1.0, 2.0).unwrap())];
        for radius in [0.0, -1.0, f64::NAN] {
            let options = NearbyPlacesOptions {
                radius,
                place_types: vec!["cafe".to_string()],
                concurrency: 1,
                verbose: false,
            };
            assert!(get_nearby_places(&client, dir.path(), &locations, &options)
                .await
                .is_err());
        }
        assert!(server.requests().is_empty());
    }

    #[test]
    fn flattens_results_matching_searched_type() {
        let dir = tempdir().unwrap();
        let nearby = dir.path().join("nearby");
        std::fs::create_dir_all(nearby.join("loc1")).unwrap();
        std::fs::write(
            nearby.join("loc1").join("cafe.json"),
            json!({
                "status": "OK",
                "results": [
                    place("Beans", &["cafe", "food"], Some(4.5), Some(10)),
                    place("Unrated", &["cafe"], Some(0.0), Some(0)),
                    place("Bakery", &["bakery"], Some(4.0), Some(3)),
                ],
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            nearby.join("loc1").join("zoo.json"),
            json!({ "status": "ZERO_RESULTS", "results": [] }).to_string(),
        )
        .unwrap();

        let types = vec!["cafe".to_string(), "zoo".to_string(), "bank".to_string()];
        let status = create_csv_nearby_places(&nearby, &types, None).unwrap();
        let csv_path = dir.path().join("nearby.csv");
        assert_eq!(
            status,
            TableStatus::Written {
                path: csv_path.clone(),
                rows: 2
            }
        );
        assert_eq!(
            std::fs::read_to_string(&csv_path).unwrap(),
            "id,type,name,place_id,price_level,rating,n_rating,loc\n\
             loc1,cafe,Beans,id-Beans,,4.5,10,\"1.5,-2.25\"\n\
             loc1,cafe,Unrated,id-Unrated,,,0,\"1.5,-2.25\"\n"
        );

        let status = create_csv_nearby_places(&nearby, &types, None).unwrap();
        assert_eq!(status, TableStatus::AlreadyExists { path: csv_path });
    }
}
