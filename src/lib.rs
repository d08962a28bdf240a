mod config;
pub mod game;
pub mod net;
pub mod persistence;
pub mod telemetry;

pub use net::client::{Client, ClientConfig, ClientSession};
pub use net::connection::{Connection, Endpoint};
pub use net::packet::{Packet, PacketHeader, PacketReader, PacketType, PacketWriter};
pub use net::server::{run_server, ServerConfig, ServerControl};
pub use net::ProtocolError;

use std::sync::Arc;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.log_dir)?;

    let database = Arc::new(
        persistence::store::Store::open(&config.database_file)
            .map_err(|err| format!("database open failed: {}", err))?,
    );
    println!("urdragon: database {}", config.database_file.display());

    let server_config = ServerConfig {
        bind_addr: config.bind_addr,
        cert_file: config.cert_file,
        key_file: config.key_file,
    };
    let control = Arc::new(ServerControl::new());

    net::server::run_server(server_config, database, control)
}
