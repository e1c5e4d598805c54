use std::env;
use std::net::SocketAddr;

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
}

impl ServerConfig {
    pub fn from_env(port: u16) -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(ServerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            database_url,
        })
    }
}
