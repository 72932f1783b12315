// src/lib.rs

// Modules publics, utilisés par les binaires (relay.rs, relay_client.rs).
pub mod communication;
pub mod config;
pub mod decoders;
pub mod error;
pub mod fanout;
pub mod monitoring;
pub mod server;
pub mod stream;
pub mod subscription;
