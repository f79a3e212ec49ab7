mod cli;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    para_classifier_lib::init_tracing();
    cli::run(args).await
}
