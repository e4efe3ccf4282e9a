//! xDS protocol types
//!
//! - `types` - native Rust representations of the four xDS resource payloads
//! - [`ResourceType`] - the discovery type URLs served from a snapshot

pub mod types;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub const ENDPOINT_TYPE_V3: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const CLUSTER_TYPE_V3: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_V3: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_V3: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

/// xDS resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// EDS
    Endpoint,
    /// CDS
    Cluster,
    /// RDS
    Route,
    /// LDS
    Listener,
}

impl ResourceType {
    /// All types, in the order proxies should apply them
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cluster,
        ResourceType::Endpoint,
        ResourceType::Listener,
        ResourceType::Route,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Endpoint => ENDPOINT_TYPE_V3,
            ResourceType::Cluster => CLUSTER_TYPE_V3,
            ResourceType::Route => ROUTE_TYPE_V3,
            ResourceType::Listener => LISTENER_TYPE_V3,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        match type_url {
            ENDPOINT_TYPE_V3 => Some(ResourceType::Endpoint),
            CLUSTER_TYPE_V3 => Some(ResourceType::Cluster),
            ROUTE_TYPE_V3 => Some(ResourceType::Route),
            LISTENER_TYPE_V3 => Some(ResourceType::Listener),
            _ => None,
        }
    }

    /// Short discovery service name (EDS, CDS, ...)
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::Endpoint => "EDS",
            ResourceType::Cluster => "CDS",
            ResourceType::Route => "RDS",
            ResourceType::Listener => "LDS",
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}
