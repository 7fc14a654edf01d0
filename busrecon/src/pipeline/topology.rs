use std::collections::{BinaryHeap, HashMap};

use gtfs_structures::{DirectionType, Gtfs, Trip};
use itertools::Itertools;

use crate::pipeline::pipeline_error::PipelineError;

/// ordered list of stops a trip visits, with an O(1) stop -> position lookup.
/// repeated stop ids keep their first position so that the lookup stays
/// well-defined.
#[derive(Debug, Clone)]
pub struct StopSequence {
    stops: Vec<String>,
    index: HashMap<String, usize>,
}

impl StopSequence {
    pub fn new(raw: Vec<String>) -> StopSequence {
        let mut stops = Vec::with_capacity(raw.len());
        let mut index = HashMap::with_capacity(raw.len());
        for stop_id in raw {
            if !index.contains_key(&stop_id) {
                index.insert(stop_id.clone(), stops.len());
                stops.push(stop_id);
            }
        }
        StopSequence { stops, index }
    }

    pub fn index_of(&self, stop_id: &str) -> Option<usize> {
        self.index.get(stop_id).copied()
    }

    pub fn contains(&self, stop_id: &str) -> bool {
        self.index.contains_key(stop_id)
    }

    pub fn stops(&self) -> &[String] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// the stops strictly between two sequence positions, used when
    /// distributing a multi-hop duration over unobserved stops.
    pub fn between(&self, start_idx: usize, end_idx: usize) -> &[String] {
        &self.stops[start_idx + 1..end_idx]
    }
}

/// per (route, direction) stop ordering plus the trips that serve it.
///
/// the sequence is taken from a single representative trip (the
/// lexicographically first trip id for the route/direction). route variants
/// with diverging stop orders are not detected; this is a known limitation
/// carried over from the source data pipeline.
#[derive(Debug, Clone)]
pub struct RouteTopology {
    pub route_id: String,
    pub direction_id: u8,
    pub sequence: StopSequence,
    pub trip_ids: Vec<String>,
}

/// maps a GTFS trip direction onto the 0/1 encoding used throughout the
/// output tables. trips without a direction fall into direction 0.
pub fn direction_code(trip: &Trip) -> u8 {
    match trip.direction_id {
        Some(DirectionType::Inbound) => 1,
        _ => 0,
    }
}

/// builds one [`RouteTopology`] per route for the requested direction.
/// routes are visited in sorted id order; `num_routes` truncates that list.
/// routes with no trip in the requested direction are skipped.
pub fn build_topologies(
    gtfs: &Gtfs,
    direction_id: u8,
    num_routes: Option<usize>,
) -> Result<Vec<RouteTopology>, PipelineError> {
    let route_ids: Vec<String> = gtfs
        .trips
        .values()
        .map(|t| t.route_id.clone())
        .sorted()
        .dedup()
        .collect();
    let selected: Vec<String> = match num_routes {
        Some(n) => route_ids.into_iter().take(n).collect(),
        None => route_ids,
    };

    let mut result = Vec::with_capacity(selected.len());
    for route_id in selected {
        let trip_ids: Vec<String> = gtfs
            .trips
            .values()
            .filter(|t| t.route_id == route_id && direction_code(t) == direction_id)
            .map(|t| t.id.clone())
            .sorted()
            .collect();
        let representative = match trip_ids.first() {
            Some(trip_id) => trip_id,
            None => continue,
        };
        let trip = gtfs.trips.get(representative).ok_or_else(|| {
            PipelineError::MalformedDataError(format!(
                "trip_id '{representative}' listed for route '{route_id}' but missing from GTFS trips"
            ))
        })?;
        let sequence = StopSequence::new(ordered_stop_ids(trip));
        if sequence.is_empty() {
            log::warn!("route '{route_id}' has an empty stop sequence, skipping");
            continue;
        }
        result.push(RouteTopology {
            route_id,
            direction_id,
            sequence,
            trip_ids,
        });
    }
    Ok(result)
}

/// stop sequence for one specific trip, used where arrivals must be matched
/// against the trip's own stop ordering rather than the route representative.
pub fn trip_sequence(gtfs: &Gtfs, trip_id: &str) -> Option<StopSequence> {
    gtfs.trips
        .get(trip_id)
        .map(|trip| StopSequence::new(ordered_stop_ids(trip)))
}

/// Returns stop ids ordered (ascending) by `stop_sequence`. Internally uses
/// [BinaryHeap] to sort, since [gtfs_structures::StopTime] does not implement
/// [Ord].
fn ordered_stop_ids(trip: &Trip) -> Vec<String> {
    let stop_queue_order: BinaryHeap<(u32, usize)> = trip
        .stop_times
        .iter()
        .enumerate()
        .map(|(i, st)| (st.stop_sequence, i))
        .collect();

    stop_queue_order
        .into_sorted_vec()
        .iter()
        .map(|(_, idx)| trip.stop_times[*idx].stop.id.clone())
        .collect()
}
