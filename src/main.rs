use anyhow::{anyhow, bail, Result};
use argh::FromArgs;
use dotenv::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gmap_retrieval::commands::nearby_places::NearbyPlacesOptions;
use gmap_retrieval::commands::reviews::ReviewsOptions;
use gmap_retrieval::commands::satellite::SatelliteOptions;
use gmap_retrieval::commands::street_view::StreetViewOptions;
use gmap_retrieval::commands::{
    create_csv_nearby_places, create_csv_reviews, get_nearby_places, get_reviews,
    get_satellite_images, get_street_view_images, read_place_ids, FetchSummary, TableStatus,
};
use gmap_retrieval::cost_analysis::{
    calculate_cost, get_n_api_calls, ApiCallCounts, CallSource, PriceTable,
};
use gmap_retrieval::google_api::street_view::CameraHeading;
use gmap_retrieval::google_api::MapsClient;
use gmap_retrieval::location::read_locations;
use gmap_retrieval::place_types::place_types_or_default;

const API_KEY_VAR: &str = "GOOGLE_MAPS_API_KEY";
const SIGNING_SECRET_VAR: &str = "GOOGLE_MAPS_SIGNING_SECRET";

#[derive(FromArgs)]
/// Retrieves Google Maps data for a list of locations and estimates what it costs.
struct Args {
    /// google Maps API key, defaults to GOOGLE_MAPS_API_KEY
    #[argh(option)]
    api_key: Option<String>,

    /// URL signing secret, defaults to GOOGLE_MAPS_SIGNING_SECRET
    #[argh(option)]
    secret: Option<String>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Satellite(SatelliteArgs),
    StreetView(StreetViewArgs),
    NearbyPlaces(NearbyPlacesArgs),
    Reviews(ReviewsArgs),
    NearbyPlacesCsv(NearbyPlacesCsvArgs),
    ReviewsCsv(ReviewsCsvArgs),
    ApiCalls(ApiCallsArgs),
    Cost(CostArgs),
}

#[derive(FromArgs)]
/// Download a satellite image centered on each location.
#[argh(subcommand, name = "satellite")]
struct SatelliteArgs {
    /// CSV file of locations (id and lat_lon, or latitude and longitude)
    #[argh(option, short = 'l')]
    locations: PathBuf,

    /// directory to save images to
    #[argh(option, short = 'o')]
    out: PathBuf,

    /// ideal horizontal coverage of each image in km
    #[argh(option, default = "2.0")]
    coverage: f64,

    /// image width in pixels, at most 640
    #[argh(option, default = "640")]
    size: u32,

    /// image height as a fraction of its width
    #[argh(option, default = "1.0")]
    ratio: f64,

    /// pixel density, 1 or 2
    #[argh(option, default = "1")]
    scale: u8,

    /// image format: png, png8, png32, gif, jpg or jpg-baseline
    #[argh(option, default = "String::from(\"png\")")]
    format: String,

    /// number of locations fetched concurrently
    #[argh(option, short = 'c', default = "1")]
    concurrency: usize,

    /// hide the progress bar
    #[argh(switch, short = 'q')]
    quiet: bool,
}

#[derive(FromArgs)]
/// Download street view images taken at random points around each location.
#[argh(subcommand, name = "street-view")]
struct StreetViewArgs {
    /// CSV file of locations (id and lat_lon, or latitude and longitude)
    #[argh(option, short = 'l')]
    locations: PathBuf,

    /// directory to save images to, one sub-directory per location
    #[argh(option, short = 'o')]
    out: PathBuf,

    /// number of images per location
    #[argh(option, short = 'n', default = "1")]
    n_images: usize,

    /// radius in km around each location to take images in
    #[argh(option, default = "1.0")]
    radius: f64,

    /// camera heading: random, location, or degrees from 0 to 360
    #[argh(option, default = "String::from(\"random\")")]
    heading: String,

    /// horizontal field of view in degrees, at most 120
    #[argh(option, default = "120")]
    fov: u32,

    /// camera pitch in degrees from -90 to 90
    #[argh(option, default = "0")]
    pitch: i32,

    /// radius in metres around each point in which a panorama may be used
    #[argh(option, default = "10")]
    search_radius: u32,

    /// also use indoor panoramas
    #[argh(switch)]
    include_indoor: bool,

    /// image size as <width>x<height>, each at most 640
    #[argh(option, default = "String::from(\"640x640\")")]
    image_size: String,

    /// give up on a location after checking n-images times this many points
    #[argh(option, default = "10")]
    limit: usize,

    /// number of locations fetched concurrently
    #[argh(option, short = 'c', default = "1")]
    concurrency: usize,

    /// hide the progress bar
    #[argh(switch, short = 'q')]
    quiet: bool,
}

#[derive(FromArgs)]
/// Search for places of each type near each location.
#[argh(subcommand, name = "nearby-places")]
struct NearbyPlacesArgs {
    /// CSV file of locations (id and lat_lon, or latitude and longitude)
    #[argh(option, short = 'l')]
    locations: PathBuf,

    /// directory to save search results to, one sub-directory per location
    #[argh(option, short = 'o')]
    out: PathBuf,

    /// search radius in km
    #[argh(option, default = "1.0")]
    radius: f64,

    /// place type to search for, may be repeated; defaults to every Google place type
    #[argh(option, short = 't')]
    place_type: Vec<String>,

    /// number of locations fetched concurrently
    #[argh(option, short = 'c', default = "1")]
    concurrency: usize,

    /// hide the progress bar
    #[argh(switch, short = 'q')]
    quiet: bool,
}

#[derive(FromArgs)]
/// Download the details and reviews of places.
#[argh(subcommand, name = "reviews")]
struct ReviewsArgs {
    /// directory to save place details to
    #[argh(option, short = 'o')]
    out: PathBuf,

    /// CSV file with a place_id column, such as the output of nearby-places-csv
    #[argh(option)]
    place_ids_csv: Option<PathBuf>,

    /// place id to retrieve, may be repeated
    #[argh(option, short = 'p')]
    place_id: Vec<String>,

    /// number of places fetched concurrently
    #[argh(option, short = 'c', default = "1")]
    concurrency: usize,

    /// hide the progress bar
    #[argh(switch, short = 'q')]
    quiet: bool,
}

#[derive(FromArgs)]
/// Flatten saved nearby search results into a CSV file.
#[argh(subcommand, name = "nearby-places-csv")]
struct NearbyPlacesCsvArgs {
    /// directory written by nearby-places
    #[argh(option, short = 'd')]
    dir: PathBuf,

    /// place type that was searched for, may be repeated; defaults to every Google place type
    #[argh(option, short = 't')]
    place_type: Vec<String>,

    /// output CSV file, defaults to <dir>.csv
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Flatten saved place details into a CSV file of reviews.
#[argh(subcommand, name = "reviews-csv")]
struct ReviewsCsvArgs {
    /// directory written by reviews
    #[argh(option, short = 'd')]
    dir: PathBuf,

    /// output CSV file, defaults to <dir>.csv
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Count the API calls made per location to collect saved data.
#[argh(subcommand, name = "api-calls")]
struct ApiCallsArgs {
    /// number of locations the data was collected for
    #[argh(option, short = 'n')]
    n_loc: usize,

    /// satellite images per location, or the directory written by satellite
    #[argh(option)]
    satellite: String,

    /// directory written by nearby-places
    #[argh(option)]
    nearby_places: PathBuf,

    /// street view images per location, or the directory written by street-view
    #[argh(option)]
    street_view: String,

    /// directory written by reviews
    #[argh(option)]
    reviews: PathBuf,

    /// place type that was searched for, may be repeated; defaults to every Google place type
    #[argh(option, short = 't')]
    place_type: Vec<String>,

    /// save the counts as JSON for the cost command
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Estimate the cost of collecting data for a number of locations.
#[argh(subcommand, name = "cost")]
struct CostArgs {
    /// number of locations to collect data for
    #[argh(option, short = 'n')]
    n_loc: usize,

    /// JSON price table, defaults to the May 2020 Google prices
    #[argh(option)]
    price_table: Option<PathBuf>,

    /// JSON file of API calls per location written by api-calls
    #[argh(option)]
    calls: Option<PathBuf>,

    /// static maps calls per location, when --calls is not given
    #[argh(option, default = "0.0")]
    static_maps: f64,

    /// nearby search calls per location, when --calls is not given
    #[argh(option, default = "0.0")]
    nearby_search: f64,

    /// street view image calls per location, when --calls is not given
    #[argh(option, default = "0.0")]
    street_view: f64,

    /// place details calls per location, when --calls is not given
    #[argh(option, default = "0.0")]
    place_details: f64,

    /// expense added to the total, negative for monthly credit
    #[argh(option, default = "0.0")]
    extra_expense: f64,
}

fn maps_client(args: &Args) -> Result<MapsClient> {
    let api_key = match &args.api_key {
        Some(api_key) => api_key.clone(),
        None => env::var(API_KEY_VAR)
            .map_err(|_| anyhow!("pass --api-key or set {}", API_KEY_VAR))?,
    };
    let secret = args
        .secret
        .clone()
        .or_else(|| env::var(SIGNING_SECRET_VAR).ok());
    let mut client = MapsClient::new(api_key)?;
    if let Some(secret) = secret.filter(|secret| !secret.is_empty()) {
        client = client.with_signing_secret(&secret)?;
    }
    info!(signed = client.has_signing_secret(), "created Google Maps client");
    Ok(client)
}

fn report_table(status: &TableStatus) {
    match status {
        TableStatus::Written { path, rows } => {
            info!(rows, path = %path.display(), "CSV file created")
        }
        TableStatus::AlreadyExists { path } => {
            info!(path = %path.display(), "CSV file already exists, nothing written")
        }
    }
}

fn report_fetch(summary: &FetchSummary, dir: &Path) {
    info!(%summary, dir = %dir.display(), "done");
}

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv().ok();

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gmap_retrieval=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .init();

    let args: Args = argh::from_env();

    match &args.command {
        Command::Satellite(cmd) => {
            let client = maps_client(&args)?;
            let locations = read_locations(&cmd.locations)?;
            let options = SatelliteOptions {
                horizontal_coverage: cmd.coverage,
                horizontal_size: cmd.size,
                image_ratio: cmd.ratio,
                scale: cmd.scale,
                format: cmd.format.clone(),
                concurrency: cmd.concurrency,
                verbose: !cmd.quiet,
            };
            let summary = get_satellite_images(&client, &cmd.out, &locations, &options).await?;
            report_fetch(&summary, &cmd.out);
        }
        Command::StreetView(cmd) => {
            let client = maps_client(&args)?;
            let locations = read_locations(&cmd.locations)?;
            let options = StreetViewOptions {
                n_images: cmd.n_images,
                radius: cmd.radius,
                heading: CameraHeading::parse(&cmd.heading)?,
                field_of_view: cmd.fov,
                pitch: cmd.pitch,
                search_radius: cmd.search_radius,
                outdoor: !cmd.include_indoor,
                image_size: cmd.image_size.clone(),
                limit: cmd.limit,
                concurrency: cmd.concurrency,
                verbose: !cmd.quiet,
            };
            let summary = get_street_view_images(&client, &cmd.out, &locations, &options).await?;
            report_fetch(&summary, &cmd.out);
        }
        Command::NearbyPlaces(cmd) => {
            let client = maps_client(&args)?;
            let locations = read_locations(&cmd.locations)?;
            let options = NearbyPlacesOptions {
                radius: cmd.radius,
                place_types: place_types_or_default(&cmd.place_type),
                concurrency: cmd.concurrency,
                verbose: !cmd.quiet,
            };
            let summary = get_nearby_places(&client, &cmd.out, &locations, &options).await?;
            report_fetch(&summary, &cmd.out);
        }
        Command::Reviews(cmd) => {
            let client = maps_client(&args)?;
            let mut place_ids = match &cmd.place_ids_csv {
                Some(path) => read_place_ids(path)?,
                None => Vec::new(),
            };
            for place_id in &cmd.place_id {
                if !place_ids.contains(place_id) {
                    place_ids.push(place_id.clone());
                }
            }
            if place_ids.is_empty() {
                bail!("pass --place-ids-csv or at least one --place-id");
            }
            let options = ReviewsOptions {
                concurrency: cmd.concurrency,
                verbose: !cmd.quiet,
            };
            let summary = get_reviews(&client, &cmd.out, &place_ids, &options).await?;
            report_fetch(&summary, &cmd.out);
        }
        Command::NearbyPlacesCsv(cmd) => {
            let place_types = place_types_or_default(&cmd.place_type);
            let status = create_csv_nearby_places(&cmd.dir, &place_types, cmd.output.as_deref())?;
            report_table(&status);
        }
        Command::ReviewsCsv(cmd) => {
            let status = create_csv_reviews(&cmd.dir, cmd.output.as_deref())?;
            report_table(&status);
        }
        Command::ApiCalls(cmd) => {
            let place_types = place_types_or_default(&cmd.place_type);
            let counts = get_n_api_calls(
                cmd.n_loc,
                &CallSource::from_arg(&cmd.satellite),
                &cmd.nearby_places,
                &CallSource::from_arg(&cmd.street_view),
                &cmd.reviews,
                Some(place_types.as_slice()),
            )?;
            print!("{}", counts);
            if let Some(output) = &cmd.output {
                std::fs::write(output, serde_json::to_vec_pretty(&counts)?)?;
                info!(path = %output.display(), "saved API call counts");
            }
        }
        Command::Cost(cmd) => {
            let price_table = match &cmd.price_table {
                Some(path) => PriceTable::from_path(path)?,
                None => PriceTable::default(),
            };
            let calls = match &cmd.calls {
                Some(path) => ApiCallCounts::from_path(path)?,
                None => ApiCallCounts::new(
                    cmd.static_maps,
                    cmd.nearby_search,
                    cmd.street_view,
                    cmd.place_details,
                ),
            };
            let estimate = calculate_cost(cmd.n_loc, &price_table, &calls, cmd.extra_expense)?;
            print!("{}", estimate);
        }
    }

    Ok(())
}
