// src/decoders/mod.rs

// Décodage des transactions relayées : adresses, programmes connus,
// instructions et indices de transfert dans les logs.
pub mod address;
pub mod logs;
pub mod programs;
pub mod transaction;
