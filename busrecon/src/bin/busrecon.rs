//! batch pipeline that reconstructs bus motion along fixed routes from
//! sparse historical position reports and derives per-segment travel
//! durations plus as-of-time position snapshots.
use busrecon::pipeline::app::PipelineApp;
use clap::Parser;

fn main() {
    env_logger::init();
    let args = PipelineApp::parse();
    args.op.run()
}
