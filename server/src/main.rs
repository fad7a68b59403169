use clap::Parser;
use log::info;
use server::config::{Args, ServerConfig};
use server::network::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server: lobby {}, gameplay {}, {} Hz",
        config.tcp_addr(),
        config.udp_addr(),
        config.tick_rate
    );
    info!("Type 'help' for operator commands");

    Server::bind(config)?.run().await
}
