// Skiff control plane server
// Wires configuration, logging, metrics and the translator syncer into the skiffd binary

pub mod metrics; // Prometheus exporter
pub mod model; // Configuration and constants
pub mod startup; // Application startup utilities

pub use model::Configuration;
