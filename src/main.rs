use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use gbn_transfer::client::Client;
use gbn_transfer::config::TransferConfig;
use gbn_transfer::document_source::DirectorySource;
use gbn_transfer::impairment::ImpairmentConfig;
use gbn_transfer::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Server,
    Client,
}

#[derive(Parser)]
struct Args {
    #[clap(long, value_enum, default_value_t = Mode::Server)]
    run: Mode,

    #[clap(long, default_value = "localhost")]
    host: String,

    #[clap(long, default_value_t = 10036)]
    port: u16,

    /// document to request
    #[clap(long, default_value = "TestFile.html")]
    rfile: String,

    /// where the client stores the received document
    #[clap(long, default_value = "reassembled.html")]
    ofile: PathBuf,

    /// directory the server serves documents from
    #[clap(long, default_value = ".")]
    root: PathBuf,

    #[clap(long, default_value_t = 0.0)]
    corruption: f64,

    #[clap(long, default_value_t = 0.0)]
    drop: f64,

    #[clap(long, default_value_t = 0.0)]
    delay_chance: f64,

    #[clap(long, default_value_t = 0)]
    delay_ms: u64,

    /// makes simulated impairment reproducible
    #[clap(long)]
    seed: Option<u64>,

    #[clap(long, default_value_t = 512)]
    packet_size: usize,

    #[clap(long, default_value_t = 32)]
    window_size: u16,

    #[clap(long, default_value_t = 20)]
    timeout_ms: u64,

    #[clap(long, default_value_t = 100)]
    max_retries: u32,

    #[clap(long, default_value_t = false)]
    no_nak: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn transfer_config(&self) -> TransferConfig {
        let mut impairment = ImpairmentConfig::new(self.corruption, self.drop, self.delay_chance, Duration::from_millis(self.delay_ms));
        impairment.seed = self.seed;

        TransferConfig {
            packet_size: self.packet_size,
            window_size: self.window_size,
            packet_timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            nak_enabled: !self.no_nak,
            impairment,
            ..TransferConfig::default()
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = Arc::new(args.transfer_config());
    config.validate()?;

    let addr = resolve(&args.host, args.port).await?;

    match args.run {
        Mode::Server => {
            let server = Server::bind(addr, config, Arc::new(DirectorySource::new(&args.root))).await?;
            info!("serving documents from {:?} on {:?}", args.root, server.local_addr()?);
            server.recv_loop().await;
            Ok(())
        }
        Mode::Client => {
            let client = Client::connect(addr, config).await?;
            let transfer = client.fetch(&args.rfile).await?;

            tokio::fs::write(&args.ofile, &transfer.content).await?;
            info!("wrote {} bytes to {:?}", transfer.content.len(), args.ofile);
            println!("{:.2}% of received packets were corrupted", transfer.stats.corruption_rate());
            Ok(())
        }
    }
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port)).await?
        .next()
        .ok_or_else(|| anyhow!("could not resolve {}:{}", host, port))
}
