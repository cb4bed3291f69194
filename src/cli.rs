use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vis-bridge", about = "Streams live system audio spectrum bars over a local WebSocket")]
pub struct Cli {
    /// Config file (TOML). Defaults to ./vis-bridge.toml or the user config dir.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// WebSocket port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Capture device name (see --list-sources)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Number of frequency bars
    #[arg(long)]
    pub bar_count: Option<usize>,

    /// Print capture devices as JSON and exit
    #[arg(long)]
    pub list_sources: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut crate::data::config::Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        if let Some(bars) = self.bar_count {
            config.bar_count = bars;
        }
    }
}
