use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::pipeline::history::HistoryRecord;
use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::topology::RouteTopology;

/// a contiguous run of this many (or more) stops with no observed distance
/// marks the whole route as unreliable, even when the run can be filled.
pub const MAX_FILLABLE_GAP: usize = 4;

/// a row in the route stop distance CSV: cumulative along-route distance of
/// one stop from the route's first stop, after gap-filling.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StopDistanceRow {
    pub route_id: String,
    pub direction_id: u8,
    pub stop_id: String,
    pub dist_along_route: f64,
}

/// per-stop cumulative distances for one route, prior to gap-filling.
///
/// the first stop anchors the scale at 0. every later stop takes the mean
/// of `dist_along_route` over all reports heading toward it (the feed
/// measures that column against the *next* stop, which is what makes this
/// direct read-off possible). stops nobody ever reported toward stay None.
pub fn estimate_route_distances(
    topology: &RouteTopology,
    history: &[&HistoryRecord],
) -> Vec<Option<f64>> {
    let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
    for record in history {
        if let Some(dist) = record.dist_along_route {
            let entry = sums.entry(record.next_stop_id.as_str()).or_insert((0.0, 0));
            entry.0 += dist;
            entry.1 += 1;
        }
    }

    let mut result = Vec::with_capacity(topology.sequence.len());
    for (i, stop_id) in topology.sequence.stops().iter().enumerate() {
        if i == 0 {
            result.push(Some(0.0));
        } else {
            let mean = sums
                .get(stop_id.as_str())
                .map(|(sum, count)| sum / *count as f64);
            result.push(mean);
        }
    }
    result
}

/// fills every run of unknown distances bounded by known values on both
/// sides with uniform linear interpolation. returns true when the route
/// should be excluded: either a bounded run of [`MAX_FILLABLE_GAP`] or more
/// stops, or a run touching either end of the sequence (which has no
/// bounding value and cannot be filled at all).
pub fn gap_fill(distances: &mut [Option<f64>]) -> bool {
    let mut excluded = false;
    let len = distances.len();
    let mut i = 0;
    while i < len {
        if distances[i].is_some() {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < len && distances[i].is_none() {
            i += 1;
        }
        let run_len = i - run_start;
        if run_len >= MAX_FILLABLE_GAP {
            excluded = true;
        }
        if run_start == 0 || i == len {
            // unbounded run, nothing to interpolate against
            excluded = true;
            continue;
        }
        let prev = distances[run_start - 1].unwrap_or(0.0);
        let next = distances[i].unwrap_or(0.0);
        let k = (run_len + 1) as f64;
        for (offset, slot) in distances[run_start..i].iter_mut().enumerate() {
            *slot = Some(prev + (offset + 1) as f64 * (next - prev) / k);
        }
    }
    excluded
}

/// materializes the filled distance list as output rows. must only be called
/// for retained routes, where gap-filling left no unknown values.
pub fn route_stop_distance_rows(
    topology: &RouteTopology,
    filled: &[Option<f64>],
) -> Result<Vec<StopDistanceRow>, PipelineError> {
    topology
        .sequence
        .stops()
        .iter()
        .zip(filled)
        .map(|(stop_id, dist)| {
            let dist_along_route = dist.ok_or_else(|| {
                PipelineError::MalformedDataError(format!(
                    "stop '{}' on retained route '{}' has no distance after gap-fill",
                    stop_id, topology.route_id
                ))
            })?;
            Ok(StopDistanceRow {
                route_id: topology.route_id.clone(),
                direction_id: topology.direction_id,
                stop_id: stop_id.clone(),
                dist_along_route,
            })
        })
        .collect()
}

/// estimates, gap-fills, and materializes stop distances for every route,
/// dropping routes whose distance coverage is unreliable. each route only
/// sees the reports belonging to its own trips.
pub fn generate_stop_distances(
    topologies: &[RouteTopology],
    history: &[HistoryRecord],
) -> Result<Vec<StopDistanceRow>, PipelineError> {
    let mut trip_lookup: HashMap<&str, usize> = HashMap::new();
    for (i, topology) in topologies.iter().enumerate() {
        for trip_id in &topology.trip_ids {
            trip_lookup.insert(trip_id.as_str(), i);
        }
    }
    let mut per_route: Vec<Vec<&HistoryRecord>> = vec![Vec::new(); topologies.len()];
    for record in history {
        if let Some(&i) = trip_lookup.get(record.trip_id.as_str()) {
            per_route[i].push(record);
        }
    }

    let result: Vec<StopDistanceRow> = topologies
        .par_iter()
        .zip(per_route.par_iter())
        .flat_map(|(topology, records)| {
            let mut distances = estimate_route_distances(topology, records);
            let excluded = gap_fill(&mut distances);
            if excluded {
                log::info!(
                    "route '{}' excluded: unreliable distance coverage",
                    topology.route_id
                );
                return Vec::new();
            }
            match route_stop_distance_rows(topology, &distances) {
                Ok(rows) => rows,
                Err(e) => {
                    log::error!("route '{}' dropped: {e}", topology.route_id);
                    Vec::new()
                }
            }
        })
        .collect();

    if result.is_empty() {
        return Err(PipelineError::EmptyTableError(
            "route stop distance table (every route was excluded)".to_string(),
        ));
    }
    Ok(result)
}

/// reads a previously computed route stop distance table, grouped by route
/// with rows kept in file order (which is stop-sequence order).
pub fn read_stop_distances(
    path: &Path,
) -> Result<HashMap<String, Vec<StopDistanceRow>>, PipelineError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_route: HashMap<String, Vec<StopDistanceRow>> = HashMap::new();
    for row in reader.deserialize::<StopDistanceRow>() {
        let row = row?;
        by_route.entry(row.route_id.clone()).or_default().push(row);
    }
    if by_route.is_empty() {
        return Err(PipelineError::EmptyTableError(format!(
            "route stop distance table {path:?}"
        )));
    }
    Ok(by_route)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipeline::topology::StopSequence;
    use chrono::NaiveDate;

    fn report(next_stop_id: &str, dist_along_route: f64) -> HistoryRecord {
        let date = NaiveDate::from_ymd_opt(2016, 1, 8).unwrap();
        HistoryRecord {
            service_date: date,
            trip_id: "t1".to_string(),
            vehicle_id: 7001,
            timestamp: date.and_hms_opt(8, 0, 0).unwrap(),
            next_stop_id: next_stop_id.to_string(),
            dist_along_route: Some(dist_along_route),
            dist_from_stop: Some(0.0),
            progress: Some(0),
        }
    }

    fn topology() -> RouteTopology {
        RouteTopology {
            route_id: "S66".to_string(),
            direction_id: 0,
            sequence: StopSequence::new(
                ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            ),
            trip_ids: vec!["t1".to_string()],
        }
    }

    #[test]
    fn test_estimate_anchors_origin_and_averages_crossings() {
        let records = vec![
            report("b", 100.0),
            report("b", 200.0),
            report("d", 900.0),
            report("a", 555.0), // reports toward the first stop never move it
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let distances = estimate_route_distances(&topology(), &refs);
        assert_eq!(
            distances,
            vec![Some(0.0), Some(150.0), None, Some(900.0)]
        );
    }

    #[test]
    fn test_generate_excludes_route_with_long_gap() {
        // only the origin and the last stop observed on a 6-stop route:
        // the 4-stop interior run triggers exclusion
        let long_route = RouteTopology {
            route_id: "X14".to_string(),
            direction_id: 0,
            sequence: StopSequence::new(
                ["a", "b", "c", "d", "e", "f"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            trip_ids: vec!["t2".to_string()],
        };
        let mut records = vec![
            report("b", 100.0),
            report("c", 200.0),
            report("d", 300.0),
        ];
        let mut far = report("f", 2000.0);
        far.trip_id = "t2".to_string();
        records.push(far);
        let topologies = vec![topology(), long_route];
        let rows = generate_stop_distances(&topologies, &records).unwrap();
        assert!(rows.iter().all(|r| r.route_id == "S66"));
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_gap_fill_interpolates_uniformly() {
        let mut distances = vec![Some(10.0), None, None, Some(40.0)];
        let excluded = gap_fill(&mut distances);
        assert!(!excluded);
        assert_eq!(
            distances,
            vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0)]
        );
    }

    #[test]
    fn test_gap_fill_is_monotone_for_increasing_bounds() {
        let mut distances = vec![Some(0.0), None, Some(900.0), None, None, Some(1500.0)];
        let excluded = gap_fill(&mut distances);
        assert!(!excluded);
        let values: Vec<f64> = distances.iter().map(|d| d.unwrap()).collect();
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(values[1], 450.0);
        assert_eq!(values[3], 1100.0);
        assert_eq!(values[4], 1300.0);
    }

    #[test]
    fn test_long_run_excludes_route_but_still_fills() {
        let mut distances = vec![Some(0.0), None, None, None, None, Some(50.0)];
        let excluded = gap_fill(&mut distances);
        assert!(excluded);
        assert_eq!(
            distances,
            vec![
                Some(0.0),
                Some(10.0),
                Some(20.0),
                Some(30.0),
                Some(40.0),
                Some(50.0)
            ]
        );
    }

    #[test]
    fn test_three_stop_run_is_fillable() {
        let mut distances = vec![Some(0.0), None, None, None, Some(40.0)];
        let excluded = gap_fill(&mut distances);
        assert!(!excluded);
        assert_eq!(distances[2], Some(20.0));
    }

    #[test]
    fn test_trailing_run_cannot_be_filled() {
        let mut distances = vec![Some(0.0), Some(100.0), None, None];
        let excluded = gap_fill(&mut distances);
        assert!(excluded);
        assert_eq!(distances[2], None);
        assert_eq!(distances[3], None);
    }

    #[test]
    fn test_leading_run_cannot_be_filled() {
        let mut distances = vec![None, Some(100.0), Some(200.0)];
        let excluded = gap_fill(&mut distances);
        assert!(excluded);
        assert_eq!(distances[0], None);
    }
}
