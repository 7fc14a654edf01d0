use super::PipelineOperation;
use clap::Parser;

/// command line tool for reconstructing bus trajectories from historical
/// position dumps and deriving segment durations and position snapshots
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct PipelineApp {
    #[command(subcommand)]
    pub op: PipelineOperation,
}
