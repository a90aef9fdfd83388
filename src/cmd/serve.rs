//! HTTP API server command — `appforge serve`.

use anyhow::Result;

pub async fn cmd_serve(port: Option<u16>, dev: bool) -> Result<()> {
    use appforge::config::Config;
    use appforge::server::{ServerConfig, start_server};

    let config = Config::from_env()?;
    let server = ServerConfig {
        port: port.unwrap_or(config.port),
        dev_mode: dev,
    };

    start_server(config, server).await
}
