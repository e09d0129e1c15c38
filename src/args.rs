use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "courtside_server", about = "Court rotation and queueing server")]
pub struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0:3536")]
    pub host: SocketAddr,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://courtside.db?mode=rwc")]
    pub database_url: String,

    #[arg(long, env = "JWT_SECRET", default_value = "secret")]
    pub jwt_secret: String,

    #[arg(
        long,
        env = "SWEEP_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,
}

impl Args {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
