use crate::game::RoomSettings;
use clap::Parser;
use shared::transport::DEFAULT_RING_CAPACITY;
use shared::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, TICK_RATE};
use std::time::Duration;

/// Command line arguments of the server binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind both sockets to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Lobby (TCP) port
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,

    /// Gameplay (UDP) port handed to clients after the handshake
    #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
    pub udp_port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value_t = TICK_RATE)]
    pub tick_rate: u32,

    /// Interval between full-state syncs in milliseconds
    #[arg(long, default_value = "5000")]
    pub sync_interval_ms: u64,

    /// Players allowed in one room
    #[arg(long, default_value = "4")]
    pub max_players: usize,

    /// Capacity of each UDP ring buffer
    #[arg(long, default_value_t = DEFAULT_RING_CAPACITY)]
    pub ring_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub tick_rate: u32,
    pub sync_interval: Duration,
    pub max_players: usize,
    pub ring_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            tick_rate: TICK_RATE,
            sync_interval: Duration::from_secs(5),
            max_players: 4,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            tcp_port: args.tcp_port,
            udp_port: args.udp_port,
            tick_rate: args.tick_rate.max(1),
            sync_interval: Duration::from_millis(args.sync_interval_ms),
            max_players: args.max_players.max(1),
            ring_capacity: args.ring_capacity,
        }
    }
}

impl ServerConfig {
    /// Loopback config on OS-assigned ports, for tests.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: 0,
            udp_port: 0,
            ..Self::default()
        }
    }

    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            max_players: self.max_players,
            sync_interval: self.sync_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_ports() {
        let config = ServerConfig::from(Args::parse_from(["server"]));
        assert_eq!(config.tcp_port, 4242);
        assert_eq!(config.udp_port, 5252);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.max_players, 4);
        assert_eq!(config.ring_capacity, 1024);
    }

    #[test]
    fn test_args_override_defaults() {
        let args = Args::parse_from([
            "server",
            "--host",
            "127.0.0.1",
            "--tcp-port",
            "7000",
            "--tick-rate",
            "30",
            "--max-players",
            "0",
        ]);
        let config = ServerConfig::from(args);

        assert_eq!(config.tcp_addr(), "127.0.0.1:7000");
        assert_eq!(config.tick_duration(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(config.room_settings().max_players, 1);
    }
}
