//! filerecall - recover deleted files from disks and disk images

use anyhow::Result;
use clap::Parser;

use filerecall::presentation::cli::{Cli, execute};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    execute(cli).await
}
