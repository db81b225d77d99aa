use clap::Parser;
use tundra::cli::{Cli, run};
use tundra::config::Settings;
use tundra::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load configuration ({e}), using defaults");
        Settings::default()
    });
    logging::init_with_config(&settings.logging);

    run(cli, settings)
}
