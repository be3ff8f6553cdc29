use clap::Parser;
use crashlog_cli::{Cli, commands};
use crashlog_logging::SubscriberBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let _guard = SubscriberBuilder::new()
        .with_level(cli.log_level.as_str())
        .try_init()?;

    let mut stdout = std::io::stdout().lock();
    commands::run(cli, &mut stdout).await
}
