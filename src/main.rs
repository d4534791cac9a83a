use anyhow::Result;
use clap::Parser;
use fintrack::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    fintrack::logging::init(cli.config.log_format);
    cli.run().await
}
