use anyhow::Result;
use bankledger::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bankledger::logging::init_logging(cli.verbose, cli.log_json);
    cli.run().await
}
