pub mod app;
mod codec;
mod expand_ops;
mod history;
mod pipeline_error;
mod segment_ops;
mod segment_row;
mod snapshot_ops;
mod snapshot_row;
mod stop_distance;
mod topology;
mod trajectory;
mod weather;
mod writer;

pub use history::{HistoryFilter, HistoryRecord};
pub use pipeline_error::PipelineError;
pub use segment_row::{ExpandedSegmentRow, SegmentRow};
pub use snapshot_ops::SnapshotConfig;
pub use snapshot_row::SnapshotRow;
pub use stop_distance::StopDistanceRow;
pub use topology::{RouteTopology, StopSequence};
pub use trajectory::ArrivalEstimate;
pub use weather::{WeatherCode, WeatherTable};
