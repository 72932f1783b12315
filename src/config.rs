use serde::Deserialize;
use anyhow::Result;
use std::time::Duration;

fn default_endpoint() -> String {
    "https://api.rpcpool.com:443".to_string()
}
fn default_websocket_port() -> u16 { 8080 }
fn default_ping_interval_secs() -> u64 { 30 }
fn default_consumer_queue() -> usize { 1024 }

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub yellowstone_endpoint: String,
    // Sans token, aucun en-tête x-token n'est envoyé.
    #[serde(default)]
    pub yellowstone_token: Option<String>,
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,

    #[serde(default = "default_ping_interval_secs")]
    pub relay_ping_interval_secs: u64,
    /// Joint la transaction décodée aux trames envoyées aux consommateurs.
    #[serde(default)]
    pub relay_expose_decoded: bool,
    #[serde(default = "default_consumer_queue")]
    pub relay_consumer_queue: usize,
    #[serde(default)]
    pub relay_metrics_port: Option<u16>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        Ok(config)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.relay_ping_interval_secs.max(1))
    }
}
