use anyhow::{anyhow, bail, Context, Result};
use rand::Rng;
use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const EARTH_CIRCUMFERENCE_KM: f64 = 40075.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            bail!("latitude {} is outside of [-90, 90]", lat);
        }
        if !(-180.0..=180.0).contains(&lon) {
            bail!("longitude {} is outside of [-180, 180]", lon);
        }
        Ok(LatLon { lat, lon })
    }
}

impl FromStr for LatLon {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| anyhow!("location {:?} is not a comma-separated lat,lon pair", s))?;
        let lat = lat
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid latitude in location {:?}", s))?;
        let lon = lon
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid longitude in location {:?}", s))?;
        LatLon::new(lat, lon)
    }
}

impl Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// A caller-identified point that data is retrieved around. The `id` names the files and
/// directories written for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: String,
    pub lat_lon: LatLon,
}

impl Location {
    pub fn new(id: impl Into<String>, lat_lon: LatLon) -> Self {
        Location {
            id: id.into(),
            lat_lon,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    id: String,
    lat_lon: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Reads locations from a CSV file with an `id` column and either a `lat_lon` column or
/// `latitude` and `longitude` columns.
#[instrument]
pub fn read_locations(path: &Path) -> Result<Vec<Location>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open locations file {}", path.display()))?;
    let mut locations = Vec::new();
    for (row, record) in reader.deserialize::<LocationRecord>().enumerate() {
        let record = record.with_context(|| format!("invalid row {} in locations file", row + 1))?;
        let lat_lon = match (&record.lat_lon, record.latitude, record.longitude) {
            (Some(lat_lon), _, _) if !lat_lon.trim().is_empty() => lat_lon.parse()?,
            (_, Some(lat), Some(lon)) => LatLon::new(lat, lon)?,
            _ => bail!(
                "row {} (id {}) needs either lat_lon or latitude and longitude",
                row + 1,
                record.id
            ),
        };
        locations.push(Location::new(record.id, lat_lon));
    }
    info!(num_locations = locations.len(), "read locations from file");
    Ok(locations)
}

/// Great-circle destination `distance_km` away from `origin` in direction `bearing` (radians,
/// clockwise from north).
pub fn destination(origin: LatLon, distance_km: f64, bearing: f64) -> Result<LatLon> {
    if distance_km > EARTH_CIRCUMFERENCE_KM / 2.0 {
        bail!(
            "distance must be smaller than {} km, got {}",
            EARTH_CIRCUMFERENCE_KM / 2.0,
            distance_km
        );
    }
    if !(0.0..=2.0 * PI).contains(&bearing) {
        bail!("direction must be between 0 and 2 * PI, got {}", bearing);
    }

    let d = distance_km / EARTH_RADIUS_KM;
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * bearing.cos()).asin();
    let dlon = (bearing.sin() * d.sin() * lat1.cos()).atan2(d.cos() - lat1.sin() * lat.sin());
    // east is positive longitude, so the offset is added
    let lon = (lon1 + dlon + PI).rem_euclid(2.0 * PI) - PI;

    Ok(LatLon {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
    })
}

/// Picks `n` points uniformly distributed over the disc of `radius_km` around `center`.
pub fn random_points_within<R: Rng>(
    rng: &mut R,
    center: LatLon,
    n: usize,
    radius_km: f64,
) -> Result<Vec<LatLon>> {
    (0..n)
        .map(|_| {
            let bearing = rng.gen_range(0.0..2.0 * PI);
            let distance = rng.gen::<f64>().sqrt() * radius_km;
            destination(center, distance, bearing)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn parses_and_displays_lat_lon() {
        let lat_lon: LatLon = " 40.714728, -73.998672".parse().unwrap();
        assert_eq!(lat_lon.lat, 40.714728);
        assert_eq!(lat_lon.lon, -73.998672);
        assert_eq!(lat_lon.to_string(), "40.714728,-73.998672");
    }

    #[test]
    fn rejects_malformed_lat_lon() {
        assert!("40.7".parse::<LatLon>().is_err());
        assert!("abc,1".parse::<LatLon>().is_err());
        assert!("91,0".parse::<LatLon>().is_err());
        assert!("0,181".parse::<LatLon>().is_err());
    }

    #[test]
    fn destination_moves_north_and_east() {
        let origin = LatLon::new(0.0, 0.0).unwrap();
        let north = destination(origin, 111.19492664455873, 0.0).unwrap();
        assert_abs_diff_eq!(north.lat, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(north.lon, 0.0, epsilon = 1e-9);

        let east = destination(origin, 111.19492664455873, PI / 2.0).unwrap();
        assert_abs_diff_eq!(east.lat, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(east.lon, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn destination_wraps_across_antimeridian() {
        let origin = LatLon::new(0.0, 179.5).unwrap();
        let east = destination(origin, 111.19492664455873, PI / 2.0).unwrap();
        assert_abs_diff_eq!(east.lon, -179.5, epsilon = 1e-9);
    }

    #[test]
    fn destination_rejects_invalid_arguments() {
        let origin = LatLon::new(0.0, 0.0).unwrap();
        assert!(destination(origin, 20100.0, 0.0).is_err());
        assert!(destination(origin, 1.0, -0.1).is_err());
        assert!(destination(origin, 1.0, 7.0).is_err());
    }

    #[test]
    fn random_points_stay_within_radius() {
        let mut rng = StdRng::seed_from_u64(7);
        let center = LatLon::new(40.714728, -73.998672).unwrap();
        let points = random_points_within(&mut rng, center, 50, 1.0).unwrap();
        assert_eq!(points.len(), 50);
        for point in points {
            // one degree of latitude is ~111 km, so 1 km is well under 0.02 degrees
            assert!((point.lat - center.lat).abs() < 0.01);
            assert!((point.lon - center.lon).abs() < 0.02);
        }
    }

    #[test]
    fn reads_locations_in_either_column_layout() {
        let mut combined = tempfile::NamedTempFile::new().unwrap();
        writeln!(combined, "id,lat_lon").unwrap();
        writeln!(combined, "nyc,\"40.714728,-73.998672\"").unwrap();
        let locations = read_locations(combined.path()).unwrap();
        assert_eq!(
            locations,
            vec![Location::new("nyc", LatLon::new(40.714728, -73.998672).unwrap())]
        );

        let mut split = tempfile::NamedTempFile::new().unwrap();
        writeln!(split, "id,latitude,longitude").unwrap();
        writeln!(split, "a,1.5,2.5").unwrap();
        writeln!(split, "b,-3,4").unwrap();
        let locations = read_locations(split.path()).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[1].id, "b");
        assert_eq!(locations[1].lat_lon, LatLon::new(-3.0, 4.0).unwrap());
    }

    #[test]
    fn read_locations_requires_coordinates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,latitude").unwrap();
        writeln!(file, "a,1.5").unwrap();
        assert!(read_locations(file.path()).is_err());
    }
}
