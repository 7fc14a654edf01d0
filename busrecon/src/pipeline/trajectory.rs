use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

use crate::pipeline::history::HistoryRecord;
use crate::pipeline::topology::StopSequence;

/// tracks with fewer usable reports than this carry too little signal to
/// reconstruct and are dropped whole.
pub const MIN_TRACK_REPORTS: usize = 3;

/// the inferred moment a vehicle reached one stop, produced by
/// interpolating between the two position reports that bracket it.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalEstimate {
    pub stop_id: String,
    pub arrival_time: NaiveDateTime,
}

/// partitions a (service_date, trip_id) group by vehicle and keeps the
/// partition with the most reports. duplicate vehicle assignments for one
/// trip-date are feed noise; the biggest track wins, ties going to the
/// vehicle encountered first. None for an empty group.
pub fn majority_vehicle<'a>(group: &[&'a HistoryRecord]) -> Option<(i64, Vec<&'a HistoryRecord>)> {
    let mut order: Vec<i64> = Vec::new();
    let mut by_vehicle: HashMap<i64, Vec<&'a HistoryRecord>> = HashMap::new();
    for record in group {
        let partition = by_vehicle.entry(record.vehicle_id).or_default();
        if partition.is_empty() {
            order.push(record.vehicle_id);
        }
        partition.push(*record);
    }

    let mut best: Option<i64> = None;
    let mut best_len = 0;
    for vehicle_id in order {
        let len = by_vehicle[&vehicle_id].len();
        if len > best_len {
            best_len = len;
            best = Some(vehicle_id);
        }
    }
    best.map(|vehicle_id| {
        let track = by_vehicle.remove(&vehicle_id).unwrap_or_default();
        (vehicle_id, track)
    })
}

/// converts a single vehicle track into estimated stop arrival times.
///
/// the track is filtered to reports heading toward a stop in the trip's
/// sequence and walked with a two-pointer scan that advances past pairs
/// whose stop-sequence index does not increase, enforcing the monotonicity
/// invariant on noisy or repeated reports. for each accepted pair the
/// arrival at the earlier report's next stop is placed at
///
///   prev.timestamp + (prev.dist_from_stop / (next_pos - prev_pos)) * elapsed
///
/// where positions are true along-route positions. pairs with no distance
/// progress, or with the earlier position at the route origin, cannot be
/// disambiguated and produce no estimate.
pub fn estimate_arrivals(
    track: &[&HistoryRecord],
    sequence: &StopSequence,
) -> Vec<ArrivalEstimate> {
    let mut reports: Vec<(usize, &HistoryRecord)> = track
        .iter()
        .filter_map(|r| sequence.index_of(&r.next_stop_id).map(|idx| (idx, *r)))
        .collect();
    if reports.len() < MIN_TRACK_REPORTS {
        return Vec::new();
    }
    reports.sort_by_key(|(_, r)| r.timestamp);

    let mut estimates = Vec::new();
    let mut i = 1;
    while i < reports.len() {
        let (mut prev_idx, mut prev) = reports[i - 1];
        let (mut next_idx, mut next) = reports[i];
        let mut exhausted = false;
        while prev_idx >= next_idx {
            i += 1;
            if i == reports.len() {
                exhausted = true;
                break;
            }
            if prev_idx == next_idx {
                prev = next;
                prev_idx = next_idx;
            }
            (next_idx, next) = reports[i];
        }
        if exhausted {
            break;
        }

        let (Some(prev_pos), Some(next_pos)) = (prev.position(), next.position()) else {
            i += 1;
            continue;
        };
        if prev_pos == next_pos || prev_pos == 0.0 {
            i += 1;
            continue;
        }
        let Some(dist_from_stop) = prev.dist_from_stop else {
            i += 1;
            continue;
        };

        let ratio = dist_from_stop / (next_pos - prev_pos);
        let elapsed_secs =
            (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        let offset = Duration::milliseconds((ratio * elapsed_secs * 1000.0).round() as i64);
        estimates.push(ArrivalEstimate {
            stop_id: prev.next_stop_id.clone(),
            arrival_time: prev.timestamp + offset,
        });
        i += 1;
    }
    estimates
}
