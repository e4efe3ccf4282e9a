//! xDS resource payloads
//!
//! The subset of the Envoy listener, route, cluster and endpoint model the
//! gateway translator emits. Payloads are plain data: `Clone` is a deep copy,
//! `PartialEq` is structural, and maps are ordered so the JSON form used for
//! content versions is canonical.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use skiff_common::ResourceKey;

// =============================================================================
// Endpoints (EDS)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
}

/// One upstream host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: SocketAddr,
    pub weight: u32,
}

impl Endpoint {
    pub fn new(address: SocketAddr) -> Self {
        Self { address, weight: 1 }
    }
}

/// Hosts of a single locality
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityEndpoints {
    pub locality: Locality,
    pub endpoints: Vec<Endpoint>,
    pub weight: u32,
}

/// Endpoints answering for one EDS cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityEndpoints>,
}

impl ClusterLoadAssignment {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: Vec::new(),
        }
    }

    pub fn add_locality(&mut self, locality: Locality, endpoints: Vec<Endpoint>, weight: u32) {
        self.endpoints.push(LocalityEndpoints {
            locality,
            endpoints,
            weight,
        });
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|l| l.endpoints.len()).sum()
    }
}

// =============================================================================
// Clusters (CDS)
// =============================================================================

/// How a cluster learns its hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscoveryType {
    /// Hosts are inlined in the cluster
    Static,
    /// Hosts come from a `ClusterLoadAssignment`
    #[default]
    Eds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub discovery_type: DiscoveryType,
    /// Endpoints resource to request; the cluster name when unset
    pub eds_service_name: Option<String>,
    pub connect_timeout_ms: u64,
    /// Upstream the cluster was generated from
    pub source: Option<ResourceKey>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            name: String::new(),
            discovery_type: DiscoveryType::Eds,
            eds_service_name: None,
            connect_timeout_ms: 5000,
            source: None,
        }
    }
}

impl Cluster {
    pub fn new_eds(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn new_static(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery_type: DiscoveryType::Static,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: ResourceKey) -> Self {
        self.source = Some(source);
        self
    }

    /// Endpoints resource this cluster needs, if it discovers hosts over EDS
    pub fn endpoint_reference(&self) -> Option<&str> {
        match self.discovery_type {
            DiscoveryType::Eds => Some(self.eds_service_name.as_deref().unwrap_or(&self.name)),
            DiscoveryType::Static => None,
        }
    }
}

// =============================================================================
// Listeners (LDS)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerAddress {
    pub address: String,
    pub port: u16,
}

impl ListenerAddress {
    pub fn tcp(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub address: ListenerAddress,
    pub filter_chains: Vec<FilterChain>,
}

impl Listener {
    pub fn new(name: impl Into<String>, address: ListenerAddress) -> Self {
        Self {
            name: name.into(),
            address,
            filter_chains: Vec::new(),
        }
    }

    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chains.push(chain);
        self
    }

    /// Route configurations this listener requests over RDS
    pub fn route_references(&self) -> impl Iterator<Item = &str> {
        self.filter_chains
            .iter()
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| match &filter.filter_type {
                NetworkFilterType::HttpConnectionManager { route_config_name } => {
                    Some(route_config_name.as_str())
                }
                NetworkFilterType::TcpProxy { .. } => None,
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChain {
    pub name: String,
    pub filters: Vec<NetworkFilter>,
}

impl FilterChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: NetworkFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFilter {
    pub name: String,
    pub filter_type: NetworkFilterType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFilterType {
    HttpConnectionManager { route_config_name: String },
    TcpProxy { cluster: String },
}

impl NetworkFilter {
    /// HTTP connection manager whose routes come from `route_config_name`
    pub fn http_connection_manager(route_config_name: impl Into<String>) -> Self {
        Self {
            name: "envoy.filters.network.http_connection_manager".to_string(),
            filter_type: NetworkFilterType::HttpConnectionManager {
                route_config_name: route_config_name.into(),
            },
        }
    }

    pub fn tcp_proxy(cluster: impl Into<String>) -> Self {
        Self {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            filter_type: NetworkFilterType::TcpProxy {
                cluster: cluster.into(),
            },
        }
    }
}

// =============================================================================
// Routes (RDS)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_hosts: Vec::new(),
        }
    }

    pub fn with_virtual_host(mut self, vhost: VirtualHost) -> Self {
        self.virtual_hosts.push(vhost);
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.virtual_hosts.iter().flat_map(|vh| vh.routes.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
    pub retry_policy: Option<RetryPolicy>,
    pub response_headers_to_add: Vec<HeaderValueOption>,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domains,
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub match_config: RouteMatch,
    pub action: RouteAction,
    /// Virtual service or route table the route was authored on
    pub source: Option<ResourceKey>,
}

impl Route {
    pub fn new(name: impl Into<String>, match_config: RouteMatch, action: RouteAction) -> Self {
        Self {
            name: name.into(),
            match_config,
            action,
            source: None,
        }
    }

    pub fn with_source(mut self, source: ResourceKey) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMatch {
    Prefix(String),
    Path(String),
}

impl Default for RouteMatch {
    fn default() -> Self {
        RouteMatch::Prefix("/".to_string())
    }
}

impl RouteMatch {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        RouteMatch::Prefix(prefix.into())
    }

    pub fn path(path: impl Into<String>) -> Self {
        RouteMatch::Path(path.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteAction {
    Route(RouteDestination),
    DirectResponse(DirectResponseAction),
}

impl Default for RouteAction {
    fn default() -> Self {
        RouteAction::Route(RouteDestination::default())
    }
}

impl RouteAction {
    /// Clusters traffic is forwarded to
    pub fn cluster_names(&self) -> Vec<&str> {
        match self {
            RouteAction::Route(destination) => {
                destination.cluster.iter().map(String::as_str).collect()
            }
            RouteAction::DirectResponse(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub cluster: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub prefix_rewrite: Option<String>,
}

impl RouteDestination {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            cluster: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Fixed response served instead of forwarding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectResponseAction {
    pub status: u32,
    pub body: Option<String>,
}

impl DirectResponseAction {
    pub fn new(status: u32, body: Option<String>) -> Self {
        Self { status, body }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_on: Vec<String>,
    pub num_retries: u32,
    pub per_try_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValueOption {
    pub header: String,
    pub value: String,
    pub append: bool,
}

/// Response headers keyed by name, as ordered header options
pub fn header_options(headers: &BTreeMap<String, String>) -> Vec<HeaderValueOption> {
    headers
        .iter()
        .map(|(header, value)| HeaderValueOption {
            header: header.clone(),
            value: value.clone(),
            append: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_count() {
        let mut cla = ClusterLoadAssignment::new("petstore_default");
        cla.add_locality(
            Locality::default(),
            vec![
                Endpoint::new("10.0.0.1:8080".parse().unwrap()),
                Endpoint::new("10.0.0.2:8080".parse().unwrap()),
            ],
            1,
        );
        cla.add_locality(Locality::default(), Vec::new(), 1);

        assert_eq!(cla.endpoint_count(), 2);
    }

    #[test]
    fn test_cluster_endpoint_reference() {
        let eds = Cluster::new_eds("petstore_default");
        assert_eq!(eds.endpoint_reference(), Some("petstore_default"));

        let renamed = Cluster {
            eds_service_name: Some("petstore-eds".to_string()),
            ..Cluster::new_eds("petstore_default")
        };
        assert_eq!(renamed.endpoint_reference(), Some("petstore-eds"));

        assert_eq!(Cluster::new_static("static").endpoint_reference(), None);
    }

    #[test]
    fn test_listener_route_references() {
        let listener = Listener::new("listener-::-8080", ListenerAddress::tcp("::", 8080))
            .with_filter_chain(
                FilterChain::new("http")
                    .with_filter(NetworkFilter::http_connection_manager("listener-::-8080-routes")),
            )
            .with_filter_chain(FilterChain::new("tcp").with_filter(NetworkFilter::tcp_proxy("db")));

        let refs: Vec<&str> = listener.route_references().collect();
        assert_eq!(refs, vec!["listener-::-8080-routes"]);
    }

    #[test]
    fn test_route_action_cluster_names() {
        let forward = RouteAction::Route(RouteDestination::cluster("petstore_default"));
        assert_eq!(forward.cluster_names(), vec!["petstore_default"]);

        let unresolved = RouteAction::Route(RouteDestination::default());
        assert!(unresolved.cluster_names().is_empty());

        let direct = RouteAction::DirectResponse(DirectResponseAction::new(404, None));
        assert!(direct.cluster_names().is_empty());
    }

    #[test]
    fn test_route_configuration_routes() {
        let config = RouteConfiguration::new("listener-::-8080-routes")
            .with_virtual_host(
                VirtualHost::new("petstore", vec!["*".to_string()])
                    .with_route(Route::new(
                        "pets",
                        RouteMatch::prefix("/pets"),
                        RouteAction::Route(RouteDestination::cluster("petstore_default")),
                    ))
                    .with_route(Route::new(
                        "health",
                        RouteMatch::path("/health"),
                        RouteAction::DirectResponse(DirectResponseAction::new(200, None)),
                    )),
            )
            .with_virtual_host(VirtualHost::new("empty", vec!["empty.example.com".to_string()]));

        let names: Vec<&str> = config.routes().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pets", "health"]);
    }

    #[test]
    fn test_header_options_are_ordered() {
        let headers = BTreeMap::from([
            ("x-b".to_string(), "2".to_string()),
            ("x-a".to_string(), "1".to_string()),
        ]);
        let options = header_options(&headers);
        assert_eq!(options[0].header, "x-a");
        assert!(!options[1].append);
    }
}
