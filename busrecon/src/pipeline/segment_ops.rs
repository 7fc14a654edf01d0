use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use gtfs_structures::Gtfs;
use itertools::Itertools;
use rayon::prelude::*;

use crate::pipeline::history::HistoryRecord;
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::segment_row::SegmentRow;
use crate::pipeline::topology::{self, StopSequence};
use crate::pipeline::trajectory::{self, ArrivalEstimate};
use crate::pipeline::weather::WeatherTable;

/// calendar and identity context shared by every segment of one trip-date.
struct TripDateContext {
    service_date: NaiveDate,
    day_of_week: u8,
    weather: u8,
    trip_id: String,
    vehicle_id: i64,
}

/// reconstructs trajectories for every (service_date, trip_id) group in the
/// filtered history and emits one segment row per consecutive arrival pair.
///
/// groups dated on or before `warmup_cutoff` are discarded as warm-up noise.
/// groups with no majority track, an unknown trip, or fewer than two arrival
/// estimates are dropped silently; a bad group never aborts the batch.
pub fn generate_segments(
    history: &[HistoryRecord],
    gtfs: &Gtfs,
    weather: &WeatherTable,
    warmup_cutoff: NaiveDate,
) -> Result<Vec<SegmentRow>, PipelineError> {
    let grouped: HashMap<(NaiveDate, String), Vec<&HistoryRecord>> = history
        .iter()
        .map(|r| ((r.service_date, r.trip_id.clone()), r))
        .into_group_map();
    let mut groups: Vec<((NaiveDate, String), Vec<&HistoryRecord>)> =
        grouped.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    log::info!("reconstructing {} trip-date groups", groups.len());

    let result: Vec<SegmentRow> = groups
        .par_iter()
        .flat_map(|((service_date, trip_id), group)| {
            group_segments(
                *service_date,
                trip_id,
                group,
                topology::trip_sequence(gtfs, trip_id),
                weather,
                warmup_cutoff,
            )
        })
        .collect();

    if result.is_empty() {
        return Err(PipelineError::EmptyTableError(
            "segment table (no trip-date group produced any segments)".to_string(),
        ));
    }
    Ok(result)
}

/// per trip-date unit of work: warm-up cutoff, majority-vehicle selection,
/// weather and calendar tagging, then trajectory reconstruction.
fn group_segments(
    service_date: NaiveDate,
    trip_id: &str,
    group: &[&HistoryRecord],
    sequence: Option<StopSequence>,
    weather: &WeatherTable,
    warmup_cutoff: NaiveDate,
) -> Vec<SegmentRow> {
    if service_date <= warmup_cutoff {
        return Vec::new();
    }
    let Some(sequence) = sequence else {
        log::debug!("trip_id '{trip_id}' not in GTFS archive, dropping group");
        return Vec::new();
    };
    let Some((vehicle_id, track)) = trajectory::majority_vehicle(group) else {
        return Vec::new();
    };
    let context = TripDateContext {
        service_date,
        day_of_week: service_date.weekday().num_days_from_monday() as u8,
        weather: weather.code_for(&service_date),
        trip_id: trip_id.to_string(),
        vehicle_id,
    };
    reconstruct_group(&track, &sequence, &context)
}

fn reconstruct_group(
    track: &[&HistoryRecord],
    sequence: &StopSequence,
    context: &TripDateContext,
) -> Vec<SegmentRow> {
    let arrivals = trajectory::estimate_arrivals(track, sequence);
    segments_from_arrivals(&arrivals, context)
}

fn segments_from_arrivals(
    arrivals: &[ArrivalEstimate],
    context: &TripDateContext,
) -> Vec<SegmentRow> {
    arrivals
        .windows(2)
        .map(|pair| {
            let (prev, next) = (&pair[0], &pair[1]);
            let travel_duration =
                (next.arrival_time - prev.arrival_time).num_milliseconds() as f64 / 1000.0;
            SegmentRow {
                segment_start: prev.stop_id.clone(),
                segment_end: next.stop_id.clone(),
                timestamp: prev.arrival_time,
                travel_duration,
                weather: context.weather,
                service_date: context.service_date,
                day_of_week: context.day_of_week,
                trip_id: context.trip_id.clone(),
                vehicle_id: context.vehicle_id,
            }
        })
        .collect()
}
