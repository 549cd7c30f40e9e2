use std::process::ExitCode;

use panoptic::cli;

#[tokio::main]
async fn main() -> ExitCode {
    cli::Cli::run().await
}
