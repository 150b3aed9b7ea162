use clap::Parser;
use log::info;
use server::config::RosterConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (roster checks per second)
    #[arg(short, long, default_value = "10")]
    tick_rate: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Players allowed on each team
    #[arg(long, default_value = "6")]
    team_size: usize,

    /// Seconds a team gets for each draft pick
    #[arg(long, default_value = "30")]
    pick_timeout: u64,

    /// Seconds before a stalled roster lock is force-released
    #[arg(long, default_value = "30")]
    lock_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = RosterConfig {
        max_team_size: args.team_size,
        ..RosterConfig::default()
    }
    .with_timeouts(
        Duration::from_secs(args.pick_timeout),
        Duration::from_secs(args.lock_timeout),
    );
    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));

    let address = format!("{}:{}", args.host, args.port);
    info!(
        "Starting room server on {} ({}Hz, {} clients max, teams of {})",
        address, args.tick_rate, args.max_clients, config.max_team_size
    );

    let mut server = Server::new(&address, tick_duration, args.max_clients, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
