/// Block propagation to connected peers.
pub mod broadcast;

/// Peer penalization and connectivity.
pub mod downloader;

/// Error types broadly used by p2p requests and deliveries.
pub mod error;

/// The per-connection peer capability.
pub mod peer;
