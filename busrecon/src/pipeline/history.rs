use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use kdam::tqdm;
use serde::{Deserialize, Serialize};

use crate::pipeline::codec;
use crate::pipeline::pipeline_error::PipelineError;

/// one observed AVL ping from the historical dump files.
///
/// `dist_along_route` is measured to the *next* stop, not the vehicle, so
/// the true along-route position is `dist_along_route - dist_from_stop`
/// (see [`HistoryRecord::position`]). both distance columns carry an
/// escaped-null marker when the unit reported nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(with = "codec::compact_date")]
    pub service_date: NaiveDate,
    pub trip_id: String,
    pub vehicle_id: i64,
    #[serde(with = "codec::utc_timestamp")]
    pub timestamp: NaiveDateTime,
    pub next_stop_id: String,
    #[serde(with = "codec::nullable_f64")]
    pub dist_along_route: Option<f64>,
    #[serde(with = "codec::nullable_f64")]
    pub dist_from_stop: Option<f64>,
    /// 0 means the vehicle is en route; other values mark layovers and
    /// deadheads which never contribute to trajectories.
    #[serde(with = "codec::nullable_i64")]
    pub progress: Option<i64>,
}

impl HistoryRecord {
    /// the vehicle's true along-route position at `timestamp`, or None when
    /// either distance column was not reported.
    pub fn position(&self) -> Option<f64> {
        match (self.dist_along_route, self.dist_from_stop) {
            (Some(along), Some(from_stop)) => Some(along - from_stop),
            _ => None,
        }
    }
}

/// row filters applied while streaming the daily history files. stages of
/// the pipeline want different subsets, so the caller states its needs
/// explicitly instead of re-reading and re-filtering a shared table.
#[derive(Debug, Default)]
pub struct HistoryFilter<'a> {
    /// inclusive date range matched against the date embedded in each
    /// `bus_time_<yyyymmdd>` filename. None reads every file present.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// keep only rows whose trip_id appears in this set.
    pub selected_trips: Option<&'a HashSet<String>>,
    /// keep only rows with progress == 0 and a present, non-zero
    /// `dist_along_route`.
    pub en_route_only: bool,
}

impl HistoryFilter<'_> {
    fn keep(&self, record: &HistoryRecord) -> bool {
        if let Some(trips) = self.selected_trips {
            if !trips.contains(&record.trip_id) {
                return false;
            }
        }
        if self.en_route_only {
            let moving = matches!(record.dist_along_route, Some(d) if d != 0.0);
            if !moving || record.progress != Some(0) {
                return false;
            }
        }
        true
    }
}

/// reads every daily dump under `dir` that passes the filter, sorted by
/// filename so output ordering is reproducible. an empty result is fatal:
/// every downstream stage needs at least one report.
pub fn load_history(
    dir: &Path,
    filter: &HistoryFilter,
) -> Result<Vec<HistoryRecord>, PipelineError> {
    let mut files: Vec<(NaiveDate, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let date = match file_date(&path) {
            Some(d) => d,
            None => continue,
        };
        if let Some((start, end)) = filter.date_range {
            if date < start || date > end {
                continue;
            }
        }
        files.push((date, path));
    }
    files.sort();

    let mut result = Vec::new();
    for (_, path) in tqdm!(files.iter(), desc = "history files") {
        log::info!("reading historical file {:?}", path.file_name());
        let reader = open_maybe_gzip(path)?;
        let mut csv_reader = csv::Reader::from_reader(reader);
        for row in csv_reader.deserialize::<HistoryRecord>() {
            let record = row?;
            if filter.keep(&record) {
                result.push(record);
            }
        }
    }
    if result.is_empty() {
        return Err(PipelineError::EmptyTableError(format!(
            "history directory {dir:?}"
        )));
    }
    Ok(result)
}

/// extracts the service date embedded in a `bus_time_<yyyymmdd>.csv[.gz]`
/// filename. files with other names are ignored.
fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    if !(name.ends_with(".csv") || name.ends_with(".csv.gz")) {
        return None;
    }
    let digits = name.strip_prefix("bus_time_")?.get(..8)?;
    NaiveDate::parse_from_str(digits, codec::compact_date::COMPACT_DATE_FORMAT).ok()
}

fn open_maybe_gzip(path: &Path) -> Result<Box<dyn Read>, PipelineError> {
    let file = File::open(path)?;
    let is_gzip = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}
