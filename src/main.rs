use clap::Parser;

use gbp_autopilot::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    gbp_autopilot::init_tracing();

    cli::run(Cli::parse()).await
}
