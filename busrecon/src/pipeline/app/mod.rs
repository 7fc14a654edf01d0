mod operation;
mod pipeline_app;

pub use operation::PipelineOperation;
pub use pipeline_app::PipelineApp;
