use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt::{self, Display};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub mod nearby_places;
pub mod reviews;
pub mod satellite;
pub mod street_view;

pub use nearby_places::{create_csv_nearby_places, get_nearby_places};
pub use reviews::{create_csv_reviews, get_reviews, read_place_ids};
pub use satellite::get_satellite_images;
pub use street_view::get_street_view_images;

/// What happened to one unit of work in a bulk retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Saved,
    Skipped,
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FetchSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Saved => self.saved += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

impl Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} saved, {} skipped, {} failed",
            self.saved, self.skipped, self.failed
        )
    }
}

/// Result of flattening a directory of responses into a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Written { path: PathBuf, rows: usize },
    AlreadyExists { path: PathBuf },
}

/// `<dir>.csv` next to the directory, used when no output path is given.
pub fn default_csv_path(dir: &Path) -> PathBuf {
    let mut path = dir.as_os_str().to_owned();
    path.push(".csv");
    PathBuf::from(path)
}

pub fn progress_bar(len: usize, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("Data Retrieval Progress {wide_bar} {pos}/{len} [{elapsed}]")
    {
        pb.set_style(style);
    }
    pb
}

/// Appends `rows` to the CSV at `path`, writing the header only when the file is new.
pub fn append_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Row<'a> {
        id: &'a str,
        value: u32,
    }

    #[test]
    fn appends_header_only_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        append_csv(&path, &[Row { id: "a", value: 1 }]).unwrap();
        append_csv(&path, &[Row { id: "b", value: 2 }]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,value\na,1\nb,2\n"
        );
    }

    #[test]
    fn default_csv_path_sits_next_to_directory() {
        assert_eq!(
            default_csv_path(Path::new("data/reviews")),
            PathBuf::from("data/reviews.csv")
        );
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = FetchSummary::default();
        for outcome in [Outcome::Saved, Outcome::Saved, Outcome::Skipped, Outcome::Failed] {
            summary.record(outcome);
        }
        assert_eq!(summary.to_string(), "2 saved, 1 skipped, 1 failed");
    }
}
