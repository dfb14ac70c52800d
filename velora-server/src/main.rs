use std::time::Duration;

use clap::Parser;
use tokio_graceful_shutdown::Toplevel;

use velora_server::{Cli, Server};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    Toplevel::new(|s| async move {
        match Server::start(&s, args).await {
            Ok(server) => {
                // Hold the server handles (notification sender, event bus)
                // until shutdown so external producers stay connected
                s.on_shutdown_requested().await;
                drop(server);
            }
            Err(e) => {
                log::error!("startup failed: {}", e);
                s.request_shutdown();
            }
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(Into::into)
}
