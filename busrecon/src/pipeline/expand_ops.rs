use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use gtfs_structures::Gtfs;
use itertools::Itertools;
use rayon::prelude::*;

use crate::pipeline::pipeline_error::PipelineError;
use crate::pipeline::segment_row::{ExpandedSegmentRow, SegmentRow};
use crate::pipeline::topology::{self, StopSequence};

/// rewrites the segment table so that every row covers exactly one
/// stop-to-stop hop.
///
/// consecutive segment rows whose start stops are more than one hop apart
/// indicate unobserved intermediate arrivals; the total elapsed time is
/// distributed uniformly across the skipped hops under a constant-speed
/// assumption. iteration is over consecutive row pairs, so the final row of
/// each trip-date group is consumed as a boundary only and not re-emitted.
pub fn expand_segments(
    segments: &[SegmentRow],
    gtfs: &Gtfs,
) -> Result<Vec<ExpandedSegmentRow>, PipelineError> {
    let grouped: HashMap<(String, NaiveDate), Vec<&SegmentRow>> = segments
        .iter()
        .map(|s| ((s.trip_id.clone(), s.service_date), s))
        .into_group_map();
    let mut groups: Vec<((String, NaiveDate), Vec<&SegmentRow>)> = grouped.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    log::info!("expanding {} trip-date segment groups", groups.len());

    let result: Vec<ExpandedSegmentRow> = groups
        .par_iter()
        .flat_map(|((trip_id, _), group)| {
            let sequence = match topology::trip_sequence(gtfs, trip_id) {
                Some(seq) => seq,
                None => {
                    log::debug!("trip_id '{trip_id}' not in GTFS archive, dropping group");
                    return Vec::new();
                }
            };
            let mut ordered: Vec<&SegmentRow> = group.clone();
            ordered.sort_by_key(|s| s.timestamp);
            expand_group(&ordered, &sequence)
        })
        .collect();

    if result.is_empty() {
        return Err(PipelineError::EmptyTableError(
            "expanded segment table".to_string(),
        ));
    }
    Ok(result)
}

fn expand_group(ordered: &[&SegmentRow], sequence: &StopSequence) -> Vec<ExpandedSegmentRow> {
    let mut result = Vec::new();
    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let (Some(start_idx), Some(end_idx)) = (
            sequence.index_of(&prev.segment_start),
            sequence.index_of(&next.segment_start),
        ) else {
            log::debug!(
                "segment endpoints ({}, {}) not in stop sequence for trip '{}'",
                prev.segment_start,
                next.segment_start,
                prev.trip_id
            );
            continue;
        };
        if end_idx <= start_idx {
            // out-of-order rows cannot be expanded meaningfully
            continue;
        }
        if end_idx - start_idx == 1 {
            result.push(as_expanded(prev));
            continue;
        }

        let skipped = sequence.between(start_idx, end_idx);
        let hop_count = skipped.len() + 1;
        let total_secs =
            (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        let average_secs = total_secs / hop_count as f64;

        let mut chain: Vec<&str> = Vec::with_capacity(hop_count + 1);
        chain.push(&prev.segment_start);
        chain.extend(skipped.iter().map(|s| s.as_str()));
        chain.push(&next.segment_start);

        for (j, hop) in chain.windows(2).enumerate() {
            let offset =
                Duration::milliseconds((j as f64 * average_secs * 1000.0).round() as i64);
            let hop_time = prev.timestamp + offset;
            result.push(ExpandedSegmentRow {
                segment_start: hop[0].to_string(),
                segment_end: hop[1].to_string(),
                segment_pair: ExpandedSegmentRow::pair_label(hop[0], hop[1]),
                time_of_day: hop_time.time(),
                day_of_week: prev.day_of_week,
                date: prev.service_date,
                weather: prev.weather,
                trip_id: prev.trip_id.clone(),
                travel_duration: average_secs,
            });
        }
    }
    result
}

fn as_expanded(row: &SegmentRow) -> ExpandedSegmentRow {
    ExpandedSegmentRow {
        segment_start: row.segment_start.clone(),
        segment_end: row.segment_end.clone(),
        segment_pair: ExpandedSegmentRow::pair_label(&row.segment_start, &row.segment_end),
        time_of_day: row.timestamp.time(),
        day_of_week: row.day_of_week,
        date: row.service_date,
        weather: row.weather,
        trip_id: row.trip_id.clone(),
        travel_duration: row.travel_duration,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 1, 13)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn segment(start: &str, end: &str, offset_secs: i64, duration: f64) -> SegmentRow {
        SegmentRow {
            segment_start: start.to_string(),
            segment_end: end.to_string(),
            timestamp: base_time() + Duration::seconds(offset_secs),
            travel_duration: duration,
            weather: 0,
            service_date: NaiveDate::from_ymd_opt(2016, 1, 13).unwrap(),
            day_of_week: 2,
            trip_id: "trip_a".to_string(),
            vehicle_id: 7001,
        }
    }

    fn sequence() -> StopSequence {
        StopSequence::new(
            ["a", "b", "c", "d", "e", "f"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[test]
    fn test_adjacent_segments_pass_through() {
        let rows = vec![
            segment("a", "b", 0, 60.0),
            segment("b", "c", 60, 90.0),
            segment("c", "d", 150, 45.0),
        ];
        let ordered: Vec<&SegmentRow> = rows.iter().collect();
        let expanded = expand_group(&ordered, &sequence());
        // the final row is a boundary only
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].segment_start, "a");
        assert_eq!(expanded[0].segment_end, "b");
        assert_eq!(expanded[0].travel_duration, 60.0);
        assert_eq!(expanded[1].segment_pair, "(b, c)");
    }

    #[test]
    fn test_multi_hop_segment_splits_uniformly() {
        // a -> d skips b and c: three hops over 90 seconds
        let rows = vec![segment("a", "d", 0, 90.0), segment("d", "e", 90, 30.0)];
        let ordered: Vec<&SegmentRow> = rows.iter().collect();
        let expanded = expand_group(&ordered, &sequence());
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded[0].segment_start, "a");
        assert_eq!(expanded[0].segment_end, "b");
        assert_eq!(expanded[1].segment_start, "b");
        assert_eq!(expanded[1].segment_end, "c");
        assert_eq!(expanded[2].segment_start, "c");
        assert_eq!(expanded[2].segment_end, "d");
        for row in &expanded {
            assert_eq!(row.travel_duration, 30.0);
        }
        // timestamps offset by cumulative multiples of the average duration
        assert_eq!(expanded[0].time_of_day, base_time().time());
        assert_eq!(
            expanded[2].time_of_day,
            (base_time() + Duration::seconds(60)).time()
        );
    }

    #[test]
    fn test_expanded_durations_sum_to_original_total() {
        let rows = vec![segment("a", "e", 0, 130.0), segment("e", "f", 130, 20.0)];
        let ordered: Vec<&SegmentRow> = rows.iter().collect();
        let expanded = expand_group(&ordered, &sequence());
        assert_eq!(expanded.len(), 4);
        let total: f64 = expanded.iter().map(|r| r.travel_duration).sum();
        assert!((total - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_stop_skips_pair() {
        let rows = vec![segment("a", "zz", 0, 60.0), segment("zz", "b", 60, 60.0)];
        let ordered: Vec<&SegmentRow> = rows.iter().collect();
        // "zz" is not in the sequence, so the only row pair is dropped
        assert!(expand_group(&ordered, &sequence()).is_empty());
    }
}
