use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveTime};
use gtfs_structures::Gtfs;
use itertools::Itertools;
use rand::Rng;
use rayon::prelude::*;

use crate::pipeline::history::HistoryRecord;
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::snapshot_row::SnapshotRow;
use crate::pipeline::stop_distance::StopDistanceRow;
use crate::pipeline::topology::StopSequence;

/// bracketing observations further apart than this are too imprecise to
/// interpolate between; the estimate is discarded rather than approximated.
pub const MAX_BRACKET_GAP_SECS: i64 = 300;

/// a deduplicated track needs at least this many points to interpolate on.
pub const MIN_SNAPSHOT_REPORTS: usize = 3;

/// target stops are drawn strictly inside the route, excluding this many
/// positions at each end of the stop sequence.
pub const EDGE_EXCLUSION: usize = 2;

/// parameters for one snapshot generation run.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// inclusive service-date range to query.
    pub date_range: (NaiveDate, NaiveDate),
    /// wall-clock query times applied to every target stop.
    pub query_times: Vec<NaiveTime>,
    /// number of random target stops drawn per route.
    pub stops_per_route: usize,
}

/// why a single (target stop, query time) probe produced no estimate.
/// `TrackEnded` and `PassedTarget` also imply every later query time for the
/// same target would fail, so the caller stops probing that target.
enum QueryOutcome {
    Estimate { vehicle_id: i64, dist_along_route: f64 },
    NotYetDeparted,
    TooImprecise,
    TrackEnded,
    PassedTarget,
}

struct RouteTargets {
    sequence: StopSequence,
    target_stops: Vec<String>,
}

/// estimates vehicle positions at the configured query times for randomly
/// chosen target stops on each route in the distance table.
///
/// routes with fewer than 5 stops cannot host an interior target and are
/// skipped. per (service_date, trip_id) group, the track is filtered to
/// in-sequence reports with positive `dist_along_route`, deduplicated to a
/// strictly-increasing-distance subsequence, and dropped when fewer than
/// [`MIN_SNAPSHOT_REPORTS`] points remain.
pub fn generate_snapshots<R: Rng>(
    gtfs: &Gtfs,
    stop_distances: &HashMap<String, Vec<StopDistanceRow>>,
    history: &[HistoryRecord],
    config: &SnapshotConfig,
    rng: &mut R,
) -> Result<Vec<SnapshotRow>, PipelineError> {
    let mut trip_routes: HashMap<String, String> = HashMap::new();
    let mut route_targets: HashMap<String, RouteTargets> = HashMap::new();
    for route_id in stop_distances.keys().sorted() {
        let stops: Vec<String> = stop_distances[route_id]
            .iter()
            .map(|row| row.stop_id.clone())
            .collect();
        let sequence = StopSequence::new(stops);
        if sequence.len() < 2 * EDGE_EXCLUSION + 1 {
            log::debug!("route '{route_id}' has too few stops for snapshot targets, skipping");
            continue;
        }
        let mut target_set: BTreeSet<String> = BTreeSet::new();
        for _ in 0..config.stops_per_route {
            let idx = rng.random_range(EDGE_EXCLUSION..sequence.len() - EDGE_EXCLUSION);
            target_set.insert(sequence.stops()[idx].clone());
        }
        for trip in gtfs.trips.values() {
            if trip.route_id == *route_id {
                trip_routes.insert(trip.id.clone(), route_id.clone());
            }
        }
        route_targets.insert(
            route_id.clone(),
            RouteTargets {
                sequence,
                target_stops: target_set.into_iter().collect(),
            },
        );
    }

    let (range_start, range_end) = config.date_range;
    let grouped: HashMap<(NaiveDate, String), Vec<&HistoryRecord>> = history
        .iter()
        .filter(|r| {
            r.service_date >= range_start
                && r.service_date <= range_end
                && trip_routes.contains_key(&r.trip_id)
        })
        .map(|r| ((r.service_date, r.trip_id.clone()), r))
        .into_group_map();
    let mut groups: Vec<((NaiveDate, String), Vec<&HistoryRecord>)> =
        grouped.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    log::info!("querying {} trip-date groups for snapshots", groups.len());

    let result: Vec<SnapshotRow> = groups
        .par_iter()
        .flat_map(|((service_date, trip_id), group)| {
            let route_id = &trip_routes[trip_id];
            let Some(targets) = route_targets.get(route_id) else {
                return Vec::new();
            };
            snapshot_group(
                group,
                targets,
                trip_id,
                route_id,
                *service_date,
                &config.query_times,
            )
        })
        .collect();
    Ok(result)
}

fn snapshot_group(
    group: &[&HistoryRecord],
    targets: &RouteTargets,
    trip_id: &str,
    route_id: &str,
    service_date: NaiveDate,
    query_times: &[NaiveTime],
) -> Vec<SnapshotRow> {
    let track = monotonic_track(group, &targets.sequence);
    if track.len() < MIN_SNAPSHOT_REPORTS {
        return Vec::new();
    }

    let mut result = Vec::new();
    for target_stop in &targets.target_stops {
        let Some(target_index) = targets.sequence.index_of(target_stop) else {
            continue;
        };
        for query in query_times {
            match query_track(&track, &targets.sequence, target_index, *query) {
                QueryOutcome::Estimate {
                    vehicle_id,
                    dist_along_route,
                } => result.push(SnapshotRow {
                    trip_id: trip_id.to_string(),
                    vehicle_id,
                    route_id: route_id.to_string(),
                    stop_id: target_stop.clone(),
                    time_of_day: *query,
                    date: service_date,
                    dist_along_route,
                }),
                QueryOutcome::NotYetDeparted | QueryOutcome::TooImprecise => continue,
                QueryOutcome::TrackEnded | QueryOutcome::PassedTarget => break,
            }
        }
    }
    result
}

/// filters a trip-date group to in-sequence reports with positive
/// along-route distance, then keeps only reports that strictly advance
/// `dist_along_route` versus the kept predecessor, guaranteeing a monotone
/// domain for interpolation.
fn monotonic_track<'a>(
    group: &[&'a HistoryRecord],
    sequence: &StopSequence,
) -> Vec<&'a HistoryRecord> {
    let mut candidates: Vec<&HistoryRecord> = group
        .iter()
        .filter(|r| {
            sequence.contains(&r.next_stop_id)
                && matches!(r.dist_along_route, Some(d) if d > 0.0)
        })
        .copied()
        .collect();
    candidates.sort_by_key(|r| r.timestamp);

    let mut track: Vec<&HistoryRecord> = Vec::with_capacity(candidates.len());
    for record in candidates {
        let advances = match track.last().and_then(|kept| kept.dist_along_route) {
            Some(kept_dist) => {
                matches!(record.dist_along_route, Some(d) if d > kept_dist)
            }
            None => true,
        };
        if advances {
            track.push(record);
        }
    }
    track
}

/// probes one target stop at one query time against a monotone track.
fn query_track(
    track: &[&HistoryRecord],
    sequence: &StopSequence,
    target_index: usize,
    query: NaiveTime,
) -> QueryOutcome {
    // find the first report past the query time
    let mut index = 1;
    while index < track.len() && track[index].timestamp.time() <= query {
        index += 1;
    }
    if index == track.len() {
        return QueryOutcome::TrackEnded;
    }
    index -= 1;

    let current_index = match sequence.index_of(&track[index].next_stop_id) {
        Some(i) => i,
        None => return QueryOutcome::TrackEnded,
    };
    if current_index > target_index {
        return QueryOutcome::PassedTarget;
    }
    if track[0].timestamp.time() > query {
        return QueryOutcome::NotYetDeparted;
    }

    let prev = track[index];
    let next = track[index + 1];
    let gap_secs = (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
    if gap_secs <= 0.0 || gap_secs > MAX_BRACKET_GAP_SECS as f64 {
        return QueryOutcome::TooImprecise;
    }
    let (Some(prev_pos), Some(next_pos)) = (prev.position(), next.position()) else {
        return QueryOutcome::TooImprecise;
    };

    let elapsed_secs =
        (query - prev.timestamp.time()).num_milliseconds() as f64 / 1000.0;
    let ratio = elapsed_secs / gap_secs;
    QueryOutcome::Estimate {
        vehicle_id: prev.vehicle_id,
        dist_along_route: prev_pos + ratio * (next_pos - prev_pos),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn record(secs_past_noon: u32, next_stop_id: &str, along: f64, from_stop: f64) -> HistoryRecord {
        let date = NaiveDate::from_ymd_opt(2016, 1, 26).unwrap();
        HistoryRecord {
            service_date: date,
            trip_id: "trip_a".to_string(),
            vehicle_id: 7001,
            timestamp: date.and_hms_opt(12, 0, 0).unwrap()
                + chrono::Duration::seconds(secs_past_noon as i64),
            next_stop_id: next_stop_id.to_string(),
            dist_along_route: Some(along),
            dist_from_stop: Some(from_stop),
            progress: Some(0),
        }
    }

    fn sequence() -> StopSequence {
        StopSequence::new(
            ["a", "b", "c", "d", "e"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn noon_plus(secs: u32) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(12 * 3600 + secs, 0).unwrap()
    }

    // reports at +100s (position 0) and +200s (position 100)
    fn track_records() -> Vec<HistoryRecord> {
        vec![
            record(100, "b", 100.0, 100.0),
            record(200, "c", 200.0, 100.0),
            record(300, "d", 300.0, 100.0),
        ]
    }

    #[test]
    fn test_query_midway_interpolates_position() {
        let records = track_records();
        let track: Vec<&HistoryRecord> = records.iter().collect();
        let outcome = query_track(&track, &sequence(), 3, noon_plus(150));
        match outcome {
            QueryOutcome::Estimate {
                dist_along_route, ..
            } => assert!((dist_along_route - 50.0).abs() < 1e-9),
            _ => panic!("expected an estimate"),
        }
    }

    #[test]
    fn test_query_before_departure_yields_nothing() {
        let records = track_records();
        let track: Vec<&HistoryRecord> = records.iter().collect();
        assert!(matches!(
            query_track(&track, &sequence(), 3, noon_plus(50)),
            QueryOutcome::NotYetDeparted
        ));
    }

    #[test]
    fn test_query_after_track_end_yields_nothing() {
        let records = track_records();
        let track: Vec<&HistoryRecord> = records.iter().collect();
        assert!(matches!(
            query_track(&track, &sequence(), 3, noon_plus(400)),
            QueryOutcome::TrackEnded
        ));
    }

    #[test]
    fn test_query_past_target_stop_yields_nothing() {
        let records = track_records();
        let track: Vec<&HistoryRecord> = records.iter().collect();
        // at +250s the vehicle is heading to "c" (index 2), past target "b"
        assert!(matches!(
            query_track(&track, &sequence(), 1, noon_plus(250)),
            QueryOutcome::PassedTarget
        ));
    }

    #[test]
    fn test_wide_bracket_gap_is_discarded() {
        let records = vec![
            record(100, "b", 100.0, 100.0),
            record(500, "c", 200.0, 100.0), // 400s gap
            record(600, "d", 300.0, 100.0),
        ];
        let track: Vec<&HistoryRecord> = records.iter().collect();
        assert!(matches!(
            query_track(&track, &sequence(), 3, noon_plus(300)),
            QueryOutcome::TooImprecise
        ));
    }

    #[test]
    fn test_track_below_minimum_after_dedup_yields_no_rows() {
        // four candidates collapse to two after the strictly-increasing
        // dedupe, below the minimum track length
        let records = vec![
            record(100, "b", 100.0, 100.0),
            record(160, "b", 100.0, 80.0),
            record(200, "b", 100.0, 40.0),
            record(300, "c", 200.0, 100.0),
        ];
        let group: Vec<&HistoryRecord> = records.iter().collect();
        let targets = RouteTargets {
            sequence: sequence(),
            target_stops: vec!["c".to_string()],
        };
        let rows = snapshot_group(
            &group,
            &targets,
            "trip_a",
            "route_1",
            NaiveDate::from_ymd_opt(2016, 1, 26).unwrap(),
            &[noon_plus(150), noon_plus(250)],
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn test_monotonic_track_drops_non_advancing_reports() {
        let records = vec![
            record(100, "b", 100.0, 100.0),
            record(160, "b", 100.0, 80.0), // same dist_along_route, dropped
            record(200, "c", 200.0, 100.0),
            record(260, "c", 150.0, 50.0), // regression, dropped
            record(300, "d", 300.0, 100.0),
            record(340, "zz", 400.0, 10.0), // unknown stop, dropped
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let track = monotonic_track(&refs, &sequence());
        let kept: Vec<f64> = track
            .iter()
            .map(|r| r.dist_along_route.unwrap())
            .collect();
        assert_eq!(kept, vec![100.0, 200.0, 300.0]);
    }
}
