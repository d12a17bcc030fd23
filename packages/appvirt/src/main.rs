use std::path::PathBuf;

use appvirt::{init_logging, HostContext};
use appvirt_core::EngineConfig;
use clap::Parser;
use tracing::{error, info};

/// appvirt-host - serve a virtual environment to guest processes
#[derive(Parser, Debug)]
#[command(name = "appvirt-host")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration (JSON). Defaults to the per-user config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address guests connect to
    #[arg(long, default_value = "127.0.0.1:7878")]
    listen: String,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("appvirt").join("config.json"))
}

fn run(args: Args) -> appvirt::Result<()> {
    let path = args
        .config
        .or_else(|| default_config_path().filter(|p| p.exists()));
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            EngineConfig::from_file(&path)?
        }
        None => {
            info!("no configuration file, using defaults");
            EngineConfig::default()
        }
    };

    let host = HostContext::open(config)?;
    let server = host.serve_tcp(args.listen.as_str())?;
    info!(addr = %server.local_addr(), "serving guests");
    server.wait();
    host.flush()
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging() {
        eprintln!("Error: {}", e);
    }

    if let Err(e) = run(args) {
        error!(error = %e, "host failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
