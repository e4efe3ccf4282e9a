//! Skiff Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Skiff components:
//! - Error types
//! - Resource identity and metadata
//! - Store client traits
//! - Utility functions and common constants

pub mod error;
pub mod resource;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{Result, SkiffError};
pub use resource::{Metadata, Resource, ResourceKey, ResourceKind, ResourceRef};
pub use traits::*;
pub use utils::is_valid_name;

/// Namespace generated resources are written to when none is configured
pub const DEFAULT_WRITE_NAMESPACE: &str = "skiff-system";

/// Label key marking resources generated by this control plane
pub const GENERATED_BY_LABEL: &str = "created-by";

/// Marker value identifying proxies generated by the gateway translator
pub const DEFAULT_GENERATED_BY: &str = "skiff-gateway";

/// Proxy name used by gateways that do not name one explicitly
pub const DEFAULT_PROXY_NAME: &str = "gateway-proxy";
