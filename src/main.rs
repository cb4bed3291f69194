mod app;
mod audio;
mod cli;
mod data;
mod net;
mod protocol;
mod utils;

use anyhow::Result;
use audio::capture::{CpalProvider, SourceProvider};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = cli::Cli::parse();
    let mut config = data::config::Config::load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);

    if cli.list_sources {
        let sources = CpalProvider.list()?;
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    utils::signal::install();
    let mut bridge = app::event_loop::Bridge::new(config, CpalProvider)?;
    bridge.run(utils::signal::running)
}
