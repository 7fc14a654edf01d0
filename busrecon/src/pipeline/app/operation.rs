//! pipeline stages for reconstructing bus motion from historical AVL dumps.
//! each stage reads pre-materialized inputs, computes one derived table, and
//! writes it as a CSV artifact; orchestration (which stages to run, in which
//! order) belongs to the caller.
use std::collections::HashSet;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveTime};
use clap::{value_parser, Subcommand};
use gtfs_structures::Gtfs;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::pipeline::history::{self, HistoryFilter};
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::segment_row::SegmentRow;
use crate::pipeline::snapshot_ops::SnapshotConfig;
use crate::pipeline::{expand_ops, segment_ops, snapshot_ops, stop_distance, topology, writer};
use crate::pipeline::weather::WeatherTable;

pub const ROUTE_STOP_DIST_FILE: &str = "route_stop_dist.csv";
pub const ORIGINAL_SEGMENT_FILE: &str = "original_segment.csv";
pub const SEGMENT_FILE: &str = "segment.csv";
pub const API_DATA_FILE: &str = "api_data.csv";

#[derive(Debug, Clone, Serialize, Deserialize, Subcommand)]
pub enum PipelineOperation {
    /// estimate cumulative along-route stop distances from historical crossings
    RouteStopDist {
        /// GTFS archive (zip or directory) with trips.txt and stop_times.txt
        #[arg(long)]
        gtfs: String,
        /// directory of daily bus_time_<yyyymmdd>.csv[.gz] dumps
        #[arg(long)]
        history_dir: String,
        /// travel direction to process (0 or 1)
        #[arg(long, default_value_t = 0)]
        direction: u8,
        /// limit to the first N routes in sorted id order
        #[arg(long)]
        num_routes: Option<usize>,
        #[arg(long, default_value_t = String::from("."))]
        output_directory: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// reconstruct trajectories and emit per-arrival-pair segment durations
    Segments {
        #[arg(long)]
        gtfs: String,
        #[arg(long)]
        history_dir: String,
        /// weather table with date/rain/snow columns
        #[arg(long)]
        weather_file: String,
        /// route stop distance table produced by route-stop-dist
        #[arg(long)]
        route_stop_dist: String,
        /// first service date of the window; the first two days are
        /// discarded as warm-up noise
        #[arg(long, value_parser = value_parser!(NaiveDate))]
        start_date: NaiveDate,
        #[arg(long, value_parser = value_parser!(NaiveDate))]
        end_date: NaiveDate,
        #[arg(long, default_value_t = 0)]
        direction: u8,
        #[arg(long, default_value_t = String::from("."))]
        output_directory: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// distribute multi-hop segment durations across skipped stops
    ExpandSegments {
        #[arg(long)]
        gtfs: String,
        /// pre-expansion segment table produced by segments
        #[arg(long)]
        segment_file: String,
        #[arg(long, default_value_t = String::from("."))]
        output_directory: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// estimate as-of-time vehicle positions against random target stops
    Snapshots {
        #[arg(long)]
        gtfs: String,
        #[arg(long)]
        history_dir: String,
        #[arg(long)]
        route_stop_dist: String,
        #[arg(long, value_parser = value_parser!(NaiveDate))]
        start_date: NaiveDate,
        #[arg(long, value_parser = value_parser!(NaiveDate))]
        end_date: NaiveDate,
        /// wall-clock query time (HH:MM:SS); repeat for a battery of times
        #[arg(long = "time", value_parser = value_parser!(NaiveTime))]
        times: Vec<NaiveTime>,
        /// number of random target stops per route
        #[arg(long, default_value_t = 4)]
        stops_per_route: usize,
        /// restrict to these route ids; repeat for multiple routes
        #[arg(long = "route")]
        routes: Vec<String>,
        /// RNG seed for reproducible target stop selection
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = String::from("."))]
        output_directory: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
}

impl PipelineOperation {
    pub fn run(&self) {
        match self {
            PipelineOperation::RouteStopDist {
                gtfs,
                history_dir,
                direction,
                num_routes,
                output_directory,
                overwrite,
            } => run_route_stop_dist(
                gtfs,
                Path::new(history_dir),
                *direction,
                *num_routes,
                Path::new(output_directory),
                *overwrite,
            )
            .unwrap_or_else(|e| panic!("failed running route-stop-dist operation: {e}")),
            PipelineOperation::Segments {
                gtfs,
                history_dir,
                weather_file,
                route_stop_dist,
                start_date,
                end_date,
                direction,
                output_directory,
                overwrite,
            } => run_segments(
                gtfs,
                Path::new(history_dir),
                Path::new(weather_file),
                Path::new(route_stop_dist),
                *start_date,
                *end_date,
                *direction,
                Path::new(output_directory),
                *overwrite,
            )
            .unwrap_or_else(|e| panic!("failed running segments operation: {e}")),
            PipelineOperation::ExpandSegments {
                gtfs,
                segment_file,
                output_directory,
                overwrite,
            } => run_expand_segments(
                gtfs,
                Path::new(segment_file),
                Path::new(output_directory),
                *overwrite,
            )
            .unwrap_or_else(|e| panic!("failed running expand-segments operation: {e}")),
            PipelineOperation::Snapshots {
                gtfs,
                history_dir,
                route_stop_dist,
                start_date,
                end_date,
                times,
                stops_per_route,
                routes,
                seed,
                output_directory,
                overwrite,
            } => run_snapshots(
                gtfs,
                Path::new(history_dir),
                Path::new(route_stop_dist),
                (*start_date, *end_date),
                times,
                *stops_per_route,
                routes,
                *seed,
                Path::new(output_directory),
                *overwrite,
            )
            .unwrap_or_else(|e| panic!("failed running snapshots operation: {e}")),
        }
    }
}

fn run_route_stop_dist(
    gtfs_path: &str,
    history_dir: &Path,
    direction: u8,
    num_routes: Option<usize>,
    output_directory: &Path,
    overwrite: bool,
) -> Result<(), PipelineError> {
    if !overwrite && writer::artifact_exists(output_directory, ROUTE_STOP_DIST_FILE) {
        log::info!("'{ROUTE_STOP_DIST_FILE}' already computed, skipping stage");
        return Ok(());
    }
    let gtfs = Gtfs::new(gtfs_path)?;
    let topologies = topology::build_topologies(&gtfs, direction, num_routes)?;
    log::info!("built {} route topologies", topologies.len());

    let selected_trips: HashSet<String> = topologies
        .iter()
        .flat_map(|t| t.trip_ids.iter().cloned())
        .collect();
    let filter = HistoryFilter {
        date_range: None,
        selected_trips: Some(&selected_trips),
        en_route_only: false,
    };
    let records = history::load_history(history_dir, &filter)?;

    let rows = stop_distance::generate_stop_distances(&topologies, &records)?;
    writer::write_rows(output_directory, ROUTE_STOP_DIST_FILE, &rows, overwrite)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_segments(
    gtfs_path: &str,
    history_dir: &Path,
    weather_file: &Path,
    route_stop_dist: &Path,
    start_date: NaiveDate,
    end_date: NaiveDate,
    direction: u8,
    output_directory: &Path,
    overwrite: bool,
) -> Result<(), PipelineError> {
    if !overwrite && writer::artifact_exists(output_directory, ORIGINAL_SEGMENT_FILE) {
        log::info!("'{ORIGINAL_SEGMENT_FILE}' already computed, skipping stage");
        return Ok(());
    }
    let gtfs = Gtfs::new(gtfs_path)?;
    let weather = WeatherTable::from_csv(weather_file)?;
    let retained_routes: HashSet<String> = stop_distance::read_stop_distances(route_stop_dist)?
        .into_keys()
        .collect();
    let selected_trips: HashSet<String> = gtfs
        .trips
        .values()
        .filter(|t| {
            retained_routes.contains(&t.route_id) && topology::direction_code(t) == direction
        })
        .map(|t| t.id.clone())
        .collect();

    let filter = HistoryFilter {
        date_range: Some((start_date, end_date)),
        selected_trips: Some(&selected_trips),
        en_route_only: true,
    };
    let records = history::load_history(history_dir, &filter)?;

    let warmup_cutoff = start_date + Duration::days(2);
    let rows = segment_ops::generate_segments(&records, &gtfs, &weather, warmup_cutoff)?;
    writer::write_rows(output_directory, ORIGINAL_SEGMENT_FILE, &rows, overwrite)?;
    Ok(())
}

fn run_expand_segments(
    gtfs_path: &str,
    segment_file: &Path,
    output_directory: &Path,
    overwrite: bool,
) -> Result<(), PipelineError> {
    if !overwrite && writer::artifact_exists(output_directory, SEGMENT_FILE) {
        log::info!("'{SEGMENT_FILE}' already computed, skipping stage");
        return Ok(());
    }
    let gtfs = Gtfs::new(gtfs_path)?;
    let segments = read_segments(segment_file)?;
    let rows = expand_ops::expand_segments(&segments, &gtfs)?;
    writer::write_rows(output_directory, SEGMENT_FILE, &rows, overwrite)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_snapshots(
    gtfs_path: &str,
    history_dir: &Path,
    route_stop_dist: &Path,
    date_range: (NaiveDate, NaiveDate),
    times: &[NaiveTime],
    stops_per_route: usize,
    routes: &[String],
    seed: Option<u64>,
    output_directory: &Path,
    overwrite: bool,
) -> Result<(), PipelineError> {
    if times.is_empty() {
        return Err(PipelineError::OtherError(
            "at least one --time query point is required".to_string(),
        ));
    }
    if !overwrite && writer::artifact_exists(output_directory, API_DATA_FILE) {
        log::info!("'{API_DATA_FILE}' already computed, skipping stage");
        return Ok(());
    }
    let gtfs = Gtfs::new(gtfs_path)?;
    let mut stop_distances = stop_distance::read_stop_distances(route_stop_dist)?;
    if !routes.is_empty() {
        let requested: HashSet<&String> = routes.iter().collect();
        stop_distances.retain(|route_id, _| requested.contains(route_id));
        if stop_distances.is_empty() {
            return Err(PipelineError::OtherError(
                "none of the requested routes appear in the route stop distance table"
                    .to_string(),
            ));
        }
    }

    let snapshot_routes: HashSet<String> = stop_distances.keys().cloned().collect();
    let selected_trips: HashSet<String> = gtfs
        .trips
        .values()
        .filter(|t| snapshot_routes.contains(&t.route_id))
        .map(|t| t.id.clone())
        .collect();
    let filter = HistoryFilter {
        date_range: Some(date_range),
        selected_trips: Some(&selected_trips),
        en_route_only: false,
    };
    let records = history::load_history(history_dir, &filter)?;

    let config = SnapshotConfig {
        date_range,
        query_times: times.to_vec(),
        stops_per_route,
    };
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::seed_from_u64(rand::random()),
    };
    let rows =
        snapshot_ops::generate_snapshots(&gtfs, &stop_distances, &records, &config, &mut rng)?;
    writer::write_rows(output_directory, API_DATA_FILE, &rows, overwrite)?;
    Ok(())
}

fn read_segments(path: &Path) -> Result<Vec<SegmentRow>, PipelineError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<SegmentRow>()
        .collect::<Result<Vec<SegmentRow>, csv::Error>>()?;
    if rows.is_empty() {
        return Err(PipelineError::EmptyTableError(format!(
            "segment table {path:?}"
        )));
    }
    Ok(rows)
}
