use anyhow::Context;
use clap::Parser;
use mr::config::CoordinatorArgs;
use mr::coordinator_node::make_coordinator;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = CoordinatorArgs::parse();
    mr::logging::init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: CoordinatorArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid arguments")?;
    let format = config.format;
    let input = config.input.clone();

    let (report, _) = make_coordinator(config)
        .await
        .with_context(|| format!("word count of {} failed", input.display()))?;

    let stdout = std::io::stdout();
    report
        .write(format, stdout.lock())
        .context("could not write the report")?;
    Ok(())
}
