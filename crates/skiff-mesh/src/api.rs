//! Declarative resource model
//!
//! The user-authored resources a sync pass consumes (gateways, virtual
//! services, route tables, options, upstreams) and the generated [`Proxy`]
//! that sits between them and the xDS snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skiff_common::{
    DEFAULT_GENERATED_BY, DEFAULT_WRITE_NAMESPACE, Metadata, Resource, ResourceKey, ResourceKind,
    ResourceRef,
};

macro_rules! impl_resource {
    ($ty:ty, $kind:expr) => {
        impl Resource for $ty {
            const KIND: ResourceKind = $kind;

            fn metadata(&self) -> &Metadata {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut Metadata {
                &mut self.metadata
            }
        }
    };
}

/// Gateway - binds a port on one or more proxies and selects virtual services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub metadata: Metadata,
    pub bind_address: String,
    pub bind_port: u16,
    /// Proxies this gateway is served by; empty means the default proxy
    #[serde(default)]
    pub proxy_names: Vec<String>,
    /// Virtual services to serve; empty selects every virtual service
    #[serde(default)]
    pub virtual_services: Vec<ResourceRef>,
}

impl Gateway {
    pub fn new(namespace: &str, name: &str, bind_port: u16) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            bind_address: "::".to_string(),
            bind_port,
            ..Default::default()
        }
    }

    pub fn with_proxy_name(mut self, proxy_name: impl Into<String>) -> Self {
        self.proxy_names.push(proxy_name.into());
        self
    }

    pub fn with_virtual_service(mut self, vs: ResourceRef) -> Self {
        self.virtual_services.push(vs);
        self
    }
}

/// Route action as authored on a virtual service or route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteSpecAction {
    /// Forward to an upstream
    Upstream(ResourceRef),
    /// Delegate matching to a route table
    Delegate(ResourceRef),
    DirectResponse { status: u32, body: Option<String> },
}

/// Route as authored on a virtual service or route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub prefix: String,
    pub action: RouteSpecAction,
    #[serde(default)]
    pub options: Option<ResourceRef>,
}

impl RouteSpec {
    pub fn to_upstream(name: &str, prefix: &str, upstream: ResourceRef) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            action: RouteSpecAction::Upstream(upstream),
            options: None,
        }
    }

    pub fn delegate(name: &str, prefix: &str, route_table: ResourceRef) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            action: RouteSpecAction::Delegate(route_table),
            options: None,
        }
    }

    pub fn with_options(mut self, options: ResourceRef) -> Self {
        self.options = Some(options);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualService {
    pub metadata: Metadata,
    pub domains: Vec<String>,
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub options: Option<ResourceRef>,
}

impl VirtualService {
    pub fn new(namespace: &str, name: &str, domains: Vec<String>) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            domains,
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub metadata: Metadata,
    pub routes: Vec<RouteSpec>,
}

impl RouteTable {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }
}

/// Per-route behaviour shared by reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOption {
    pub metadata: Metadata,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub prefix_rewrite: Option<String>,
}

/// Per-virtual-host behaviour shared by reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHostOption {
    pub metadata: Metadata,
    pub retries: Option<u32>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamHost {
    pub address: String,
    pub port: u16,
}

/// Upstream - a named set of hosts routes may forward to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    pub metadata: Metadata,
    pub hosts: Vec<UpstreamHost>,
}

impl Upstream {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            hosts: Vec::new(),
        }
    }

    pub fn with_host(mut self, address: &str, port: u16) -> Self {
        self.hosts.push(UpstreamHost {
            address: address.to_string(),
            port,
        });
        self
    }

    /// Name of the cluster generated for this upstream
    pub fn cluster_name(&self) -> String {
        upstream_cluster_name(&self.metadata.resource_ref())
    }
}

/// Cluster name for an upstream reference
pub fn upstream_cluster_name(upstream: &ResourceRef) -> String {
    format!("{}_{}", upstream.name, upstream.namespace)
}

// =============================================================================
// Generated proxy
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyRouteAction {
    Upstream(ResourceRef),
    DirectResponse { status: u32, body: Option<String> },
}

/// A fully resolved route (delegation flattened, options inlined)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub name: String,
    pub prefix: String,
    pub action: ProxyRouteAction,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub prefix_rewrite: Option<String>,
    /// Virtual service or route table that authored the route
    pub source: ResourceKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyVirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<ProxyRoute>,
    pub retries: Option<u32>,
    pub response_headers: BTreeMap<String, String>,
    /// Virtual service the host was generated from
    pub source: ResourceRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyListener {
    pub name: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub virtual_hosts: Vec<ProxyVirtualHost>,
    /// Gateway the listener was generated from
    pub source: ResourceRef,
}

/// Proxy - generated intermediate representation for one proxy deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub metadata: Metadata,
    pub listeners: Vec<ProxyListener>,
}

impl Proxy {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            listeners: Vec::new(),
        }
    }

    /// Same spec and labels, ignoring the store-assigned resource version
    pub fn same_spec(&self, other: &Proxy) -> bool {
        self.metadata.name == other.metadata.name
            && self.metadata.namespace == other.metadata.namespace
            && self.metadata.labels == other.metadata.labels
            && self.listeners == other.listeners
    }
}

impl_resource!(Gateway, ResourceKind::Gateway);
impl_resource!(VirtualService, ResourceKind::VirtualService);
impl_resource!(RouteTable, ResourceKind::RouteTable);
impl_resource!(RouteOption, ResourceKind::RouteOption);
impl_resource!(VirtualHostOption, ResourceKind::VirtualHostOption);
impl_resource!(Upstream, ResourceKind::Upstream);
impl_resource!(Proxy, ResourceKind::Proxy);

// =============================================================================
// Snapshots and settings
// =============================================================================

/// Every declarative resource known to one sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeSnapshot {
    #[serde(default)]
    pub gateways: Vec<Gateway>,
    #[serde(default)]
    pub virtual_services: Vec<VirtualService>,
    #[serde(default)]
    pub route_tables: Vec<RouteTable>,
    #[serde(default)]
    pub route_options: Vec<RouteOption>,
    #[serde(default)]
    pub virtual_host_options: Vec<VirtualHostOption>,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    /// Generated proxies, installed by the syncer before xDS translation
    #[serde(default)]
    pub proxies: Vec<Proxy>,
}

impl DeclarativeSnapshot {
    /// The routing subset the gateway translator works from
    pub fn gateway_snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            gateways: self.gateways.clone(),
            virtual_services: self.virtual_services.clone(),
            route_tables: self.route_tables.clone(),
            route_options: self.route_options.clone(),
            virtual_host_options: self.virtual_host_options.clone(),
        }
    }

    pub fn upstream(&self, upstream: &ResourceRef) -> Option<&Upstream> {
        self.upstreams
            .iter()
            .find(|u| {
                u.metadata.namespace == upstream.namespace && u.metadata.name == upstream.name
            })
    }
}

/// Routing-relevant subset of a [`DeclarativeSnapshot`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySnapshot {
    pub gateways: Vec<Gateway>,
    pub virtual_services: Vec<VirtualService>,
    pub route_tables: Vec<RouteTable>,
    pub route_options: Vec<RouteOption>,
    pub virtual_host_options: Vec<VirtualHostOption>,
}

fn find<'a, T: Resource>(items: &'a [T], target: &ResourceRef) -> Option<&'a T> {
    items.iter().find(|item| {
        let meta = item.metadata();
        meta.namespace == target.namespace && meta.name == target.name
    })
}

impl GatewaySnapshot {
    pub fn virtual_service(&self, target: &ResourceRef) -> Option<&VirtualService> {
        find(&self.virtual_services, target)
    }

    pub fn route_table(&self, target: &ResourceRef) -> Option<&RouteTable> {
        find(&self.route_tables, target)
    }

    pub fn route_option(&self, target: &ResourceRef) -> Option<&RouteOption> {
        find(&self.route_options, target)
    }

    pub fn virtual_host_option(&self, target: &ResourceRef) -> Option<&VirtualHostOption> {
        find(&self.virtual_host_options, target)
    }
}

/// How routes invalidated by a rejected resource are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidConfigPolicy {
    /// Replace invalid routes with a direct response instead of dropping them
    pub replace_invalid_routes: bool,
    #[serde(default = "default_invalid_route_response_code")]
    pub invalid_route_response_code: u32,
    #[serde(default = "default_invalid_route_response_body")]
    pub invalid_route_response_body: String,
}

pub const DEFAULT_INVALID_ROUTE_RESPONSE_CODE: u32 = 404;
pub const DEFAULT_INVALID_ROUTE_RESPONSE_BODY: &str =
    "Skiff gateway has invalid configuration. Administrators should check the resource reports for more information.";

fn default_invalid_route_response_code() -> u32 {
    DEFAULT_INVALID_ROUTE_RESPONSE_CODE
}

fn default_invalid_route_response_body() -> String {
    DEFAULT_INVALID_ROUTE_RESPONSE_BODY.to_string()
}

impl Default for InvalidConfigPolicy {
    fn default() -> Self {
        Self {
            replace_invalid_routes: true,
            invalid_route_response_code: DEFAULT_INVALID_ROUTE_RESPONSE_CODE,
            invalid_route_response_body: DEFAULT_INVALID_ROUTE_RESPONSE_BODY.to_string(),
        }
    }
}

/// Settings that shape one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Namespace generated proxies are written to
    pub write_namespace: String,
    /// Marker value written under the `created-by` label
    pub generated_by: String,
    /// Also persist generated proxies to the durable proxy store
    pub persist_proxy_spec: bool,
    pub invalid_config_policy: Option<InvalidConfigPolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            write_namespace: DEFAULT_WRITE_NAMESPACE.to_string(),
            generated_by: DEFAULT_GENERATED_BY.to_string(),
            persist_proxy_spec: false,
            invalid_config_policy: None,
        }
    }
}
