use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::commands::street_view::count_png_files;
use crate::google_api::nearby_search::PAGE_SIZE;
use crate::place_types::default_place_types;

pub const STATIC_MAPS: &str = "static_maps";
pub const NEARBY_SEARCH: &str = "nearby_search";
pub const STATIC_STREET_VIEW: &str = "static_street_view";
pub const PLACES_DETAILS: &str = "places_details(atmosphere)";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "gif"];

/// Price in USD per 1000 calls of each API, for each tier of monthly call volume. Tier `i`
/// applies to the calls above `thresholds[i]` and up to `thresholds[i + 1]`; the last tier has
/// no upper bound.
///
/// Street view metadata requests are free and are not listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub thresholds: Vec<f64>,
    pub prices: BTreeMap<String, Vec<f64>>,
}

impl Default for PriceTable {
    /// Google Maps Platform prices as of May 3, 2020. Check them against the current price sheet
    /// before relying on an estimate.
    fn default() -> Self {
        let prices = [
            (STATIC_MAPS, [2.0, 1.6]),
            (NEARBY_SEARCH, [40.0, 32.0]),
            (STATIC_STREET_VIEW, [7.0, 5.6]),
            (PLACES_DETAILS, [22.0, 17.6]),
        ]
        .iter()
        .map(|(api, tiers)| (api.to_string(), tiers.to_vec()))
        .collect();
        PriceTable {
            thresholds: vec![0.0, 100_000.0],
            prices,
        }
    }
}

impl PriceTable {
    pub fn from_json(json: &str) -> Result<Self> {
        let table: PriceTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let table = PriceTable::from_json(&json)
            .with_context(|| format!("invalid price table in {}", path.display()))?;
        info!(apis = table.prices.len(), "loaded price table");
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        match self.thresholds.first() {
            Some(first) if *first == 0.0 => {}
            Some(first) => bail!("first threshold must be 0, got {}", first),
            None => bail!("price table has no thresholds"),
        }
        if self.thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            bail!("thresholds must be strictly ascending");
        }
        for (api, tiers) in &self.prices {
            if tiers.len() != self.thresholds.len() {
                bail!(
                    "{} has {} prices but there are {} tiers",
                    api,
                    tiers.len(),
                    self.thresholds.len()
                );
            }
            if tiers.iter().any(|price| *price < 0.0) {
                bail!("{} has a negative price", api);
            }
        }
        Ok(())
    }

    /// Cost in USD of `calls` calls of `api`, each tier charging for the calls that fall in it.
    pub fn cost(&self, api: &str, calls: f64) -> Result<f64> {
        let tiers = self
            .prices
            .get(api)
            .ok_or_else(|| anyhow!("no price for API {}", api))?;
        let mut cost = 0.0;
        for (i, price) in tiers.iter().enumerate() {
            let above_lower = (calls - self.thresholds[i]).max(0.0);
            let above_upper = match self.thresholds.get(i + 1) {
                Some(upper) => (calls - upper).max(0.0),
                None => 0.0,
            };
            cost += (above_lower - above_upper) * price / 1000.0;
        }
        Ok(cost)
    }
}

/// Number of calls of each API made per location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiCallCounts(pub BTreeMap<String, f64>);

impl ApiCallCounts {
    pub fn new(
        static_maps: f64,
        nearby_search: f64,
        static_street_view: f64,
        places_details: f64,
    ) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(STATIC_MAPS.to_string(), static_maps);
        counts.insert(NEARBY_SEARCH.to_string(), nearby_search);
        counts.insert(STATIC_STREET_VIEW.to_string(), static_street_view);
        counts.insert(PLACES_DETAILS.to_string(), places_details);
        ApiCallCounts(counts)
    }

    pub fn get(&self, api: &str) -> Option<f64> {
        self.0.get(api).copied()
    }

    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("invalid API call counts in {}", path.display()))
    }
}

impl Display for ApiCallCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (api, calls) in &self.0 {
            writeln!(f, "{}: {}", api, calls)?;
        }
        Ok(())
    }
}

/// Where the number of satellite or street view calls per location comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSource {
    /// A known number of calls per location.
    PerLocation(f64),
    /// A directory written by the matching retrieval command.
    Directory(PathBuf),
}

impl CallSource {
    /// Reads a command-line argument: an existing path is a directory, a number is a count per
    /// location, and anything else is taken as a directory to report as missing later.
    pub fn from_arg(arg: &str) -> Self {
        let path = Path::new(arg);
        if path.exists() {
            return CallSource::Directory(path.to_path_buf());
        }
        match arg.parse::<f64>() {
            Ok(calls) => CallSource::PerLocation(calls),
            Err(_) => CallSource::Directory(path.to_path_buf()),
        }
    }
}

/// Counts the calls per location made to collect the data in the given directories.
///
/// A nearby search costs one call per page of up to 20 results, and one call when nothing was
/// found. A search without a saved file is counted as one that found nothing.
#[instrument(skip(place_types))]
pub fn get_n_api_calls(
    n_loc: usize,
    satellite: &CallSource,
    nearby_places_dir: &Path,
    street_view: &CallSource,
    reviews_dir: &Path,
    place_types: Option<&[String]>,
) -> Result<ApiCallCounts> {
    if n_loc == 0 {
        bail!("number of locations must be at least 1");
    }
    let n = n_loc as f64;

    let static_maps = match satellite {
        CallSource::PerLocation(calls) => *calls,
        CallSource::Directory(dir) => count_files(dir, &IMAGE_EXTENSIONS)? as f64 / n,
    };

    let default_types;
    let place_types = match place_types {
        Some(types) => types,
        None => {
            default_types = default_place_types();
            default_types.as_slice()
        }
    };
    let nearby_search = count_nearby_search_calls(nearby_places_dir, place_types)? as f64 / n;

    let static_street_view = match street_view {
        CallSource::PerLocation(calls) => *calls,
        CallSource::Directory(dir) => mean_images_per_location(dir)?,
    };

    let places_details = count_files(reviews_dir, &["json"])? as f64 / n;

    let counts = ApiCallCounts::new(static_maps, nearby_search, static_street_view, places_details);
    debug!(?counts, "counted API calls per location");
    Ok(counts)
}

fn count_files(dir: &Path, extensions: &[&str]) -> Result<usize> {
    let mut count = 0;
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| extensions.contains(&ext));
        if path.is_file() && matches {
            count += 1;
        }
    }
    Ok(count)
}

fn sub_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[derive(Debug, Deserialize)]
struct SearchFile {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

fn count_nearby_search_calls(dir: &Path, place_types: &[String]) -> Result<usize> {
    let mut calls = 0;
    for sub_dir in sub_dirs(dir)? {
        for place_type in place_types {
            let path = sub_dir.join(format!("{}.json", place_type));
            let n_results = if path.exists() {
                let contents = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let search: SearchFile = serde_json::from_slice(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                search.results.len()
            } else {
                warn!(path = %path.display(), "no saved search, counting it as empty");
                0
            };
            calls += if n_results == 0 {
                1
            } else {
                (n_results + PAGE_SIZE - 1) / PAGE_SIZE
            };
        }
    }
    Ok(calls)
}

fn mean_images_per_location(dir: &Path) -> Result<f64> {
    let dirs = sub_dirs(dir)?;
    if dirs.is_empty() {
        bail!("no location directories in {}", dir.display());
    }
    let mut total = 0;
    for sub_dir in &dirs {
        total += count_png_files(sub_dir)?;
    }
    Ok(total as f64 / dirs.len() as f64)
}

/// Estimated cost of collecting data for a number of locations.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub n_locations: usize,
    pub total: f64,
    pub per_api: BTreeMap<String, f64>,
}

impl Display for CostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.n_locations as f64;
        writeln!(
            f,
            "The total cost for {} entries is: {} USD (avg={}).",
            self.n_locations,
            self.total,
            self.total / n
        )?;
        for (api, cost) in &self.per_api {
            if *cost != 0.0 {
                writeln!(f, "   {} cost {} USD (avg={}).", api, cost, cost / n)?;
            }
        }
        Ok(())
    }
}

/// Estimates the cost of making `calls_per_loc` calls for each of `n_loc` locations within a
/// single billing month. `extra_expense` is added to the total and may be negative to account
/// for monthly credit.
#[instrument(skip(price_table))]
pub fn calculate_cost(
    n_loc: usize,
    price_table: &PriceTable,
    calls_per_loc: &ApiCallCounts,
    extra_expense: f64,
) -> Result<CostEstimate> {
    if n_loc == 0 {
        bail!("number of locations must be at least 1");
    }
    price_table.validate()?;
    if !calls_per_loc.0.keys().eq(price_table.prices.keys()) {
        bail!(
            "APIs of call counts ({}) and price table ({}) have to be identical",
            calls_per_loc.0.keys().cloned().collect::<Vec<_>>().join(", "),
            price_table.prices.keys().cloned().collect::<Vec<_>>().join(", "),
        );
    }

    let mut per_api = BTreeMap::new();
    for (api, calls) in &calls_per_loc.0 {
        let cost = price_table.cost(api, calls * n_loc as f64)?;
        per_api.insert(api.clone(), cost);
    }
    let total = per_api.values().sum::<f64>() + extra_expense;
    info!(total, "calculated cost");
    Ok(CostEstimate {
        n_locations: n_loc,
        total,
        per_api,
    })
}
