use std::io;
use std::path::PathBuf;

use clap::Parser;
use wavecast::{Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "wavecast-server",
    about = "Audio streaming server for chunked PCM over TCP"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Directory resources are served from and recorded into
    #[arg(long, short, default_value = "media")]
    storage: PathBuf,

    /// Maximum concurrent control connections
    #[arg(long, default_value_t = 16)]
    max_connections: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut server = Server::with_config(
        &args.bind,
        ServerConfig {
            storage_dir: args.storage,
            max_connections: args.max_connections,
        },
    );

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!("wavecast server on {}, press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    let _ = server.stop();
}
