use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::pipeline::codec;

/// a synthetic "as of time T" observation: the estimated along-route
/// position of a vehicle at a query time, while it was still upstream of a
/// chosen target stop. remaining-stop counts are derivable downstream by
/// comparing the estimated distance against the route stop distance table.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotRow {
    pub trip_id: String,
    pub vehicle_id: i64,
    pub route_id: String,
    /// the target stop this query was issued against.
    pub stop_id: String,
    #[serde(with = "codec::time_of_day")]
    pub time_of_day: NaiveTime,
    #[serde(with = "codec::compact_date")]
    pub date: NaiveDate,
    pub dist_along_route: f64,
}
