use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::pipeline::codec;

/// a row in the pre-expansion segment CSV: the travel duration between two
/// consecutively observed stop arrivals for one trip-date. before expansion
/// the two stops may be more than one hop apart in the stop sequence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SegmentRow {
    pub segment_start: String,
    pub segment_end: String,
    /// estimated arrival time at `segment_start`.
    #[serde(with = "codec::utc_timestamp")]
    pub timestamp: NaiveDateTime,
    /// seconds elapsed between the two arrivals.
    pub travel_duration: f64,
    /// 0 sunny, 1 rainy, 2 snowy.
    pub weather: u8,
    #[serde(with = "codec::compact_date")]
    pub service_date: NaiveDate,
    /// Monday = 0 through Sunday = 6.
    pub day_of_week: u8,
    pub trip_id: String,
    pub vehicle_id: i64,
}

/// a row in the post-expansion segment CSV, where every record covers
/// exactly one stop-to-stop hop.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExpandedSegmentRow {
    pub segment_start: String,
    pub segment_end: String,
    /// `"(start, end)"`, kept for grouping convenience downstream.
    pub segment_pair: String,
    #[serde(with = "codec::time_of_day")]
    pub time_of_day: NaiveTime,
    pub day_of_week: u8,
    #[serde(with = "codec::compact_date")]
    pub date: NaiveDate,
    pub weather: u8,
    pub trip_id: String,
    pub travel_duration: f64,
}

impl ExpandedSegmentRow {
    pub fn pair_label(segment_start: &str, segment_end: &str) -> String {
        format!("({segment_start}, {segment_end})")
    }
}
