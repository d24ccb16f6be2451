use anyhow::Context;
use clap::Parser;
use mr::config::WorkerArgs;
use mr::worker_node::make_worker;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = WorkerArgs::parse();
    mr::logging::init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid arguments")?;
    make_worker(config).await.context("worker failed")?;
    Ok(())
}
