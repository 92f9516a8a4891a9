mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use chapterbox::app::{self, Collaborators};
use chapterbox::{api, config::Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let config = match args.config {
                Some(path) => Config::load_from_path(path)?,
                None => Config::load()?,
            };
            let address = args.address.unwrap_or(config.server.bind_addr);

            let app = app::build(config, Collaborators::default())?;
            let scheduler = tokio::spawn(app.scheduler.run());

            api::run(app.state, address, app.shutdown.clone()).await?;

            // The API's shutdown path cancels the token; wait for the
            // scheduler to flush its final state.
            app.shutdown.cancel();
            scheduler.await?;
        }
    }

    Ok(())
}
