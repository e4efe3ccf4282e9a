//! Translators
//!
//! Two translation steps feed a sync pass:
//!
//! - [`GatewayTranslator`] turns the gateways served by one proxy, with the
//!   virtual services and route tables they select, into a generated [`Proxy`]
//! - [`XdsTranslator`] turns a proxy plus the upstreams it routes to into an
//!   [`XdsSnapshot`]
//!
//! Both report per-resource problems instead of failing, so one bad resource
//! never blocks the rest of the configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use skiff_common::{DEFAULT_PROXY_NAME, Resource, ResourceKey, ResourceKind, ResourceRef, Result};
use tracing::debug;

use crate::api::{
    DeclarativeSnapshot, Gateway, GatewaySnapshot, Proxy, ProxyListener, ProxyRoute,
    ProxyRouteAction, ProxyVirtualHost, RouteSpec, RouteSpecAction, VirtualService,
    upstream_cluster_name,
};
use crate::report::ResourceReports;
use crate::snapshot::XdsSnapshot;
use crate::xds::types::{
    Cluster, ClusterLoadAssignment, DirectResponseAction, Endpoint, FilterChain, Listener,
    ListenerAddress, Locality, NetworkFilter, RetryPolicy, Route, RouteAction, RouteConfiguration,
    RouteDestination, RouteMatch, VirtualHost, header_options,
};

/// Translates gateways into the proxy that serves them
pub trait GatewayTranslator: Send + Sync {
    /// Returns `None` when no gateway is served by `proxy_name`
    fn translate(
        &self,
        snapshot: &GatewaySnapshot,
        proxy_name: &str,
        write_namespace: &str,
    ) -> (Option<Proxy>, ResourceReports);
}

/// Translates a proxy into the xDS resources for its node
pub trait XdsTranslator: Send + Sync {
    fn translate(
        &self,
        snapshot: &DeclarativeSnapshot,
        proxy: &Proxy,
    ) -> Result<(XdsSnapshot, ResourceReports)>;
}

/// Names of the proxies the gateways ask to be served by, sorted and deduplicated
pub fn proxy_names(gateways: &[Gateway]) -> Vec<String> {
    gateways
        .iter()
        .flat_map(gateway_proxy_names)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn gateway_proxy_names(gateway: &Gateway) -> Vec<String> {
    if gateway.proxy_names.is_empty() {
        vec![DEFAULT_PROXY_NAME.to_string()]
    } else {
        gateway.proxy_names.clone()
    }
}

/// Cache node key for a proxy; data-plane node ids carry the same value
pub fn node_key(proxy: &Proxy) -> String {
    format!("{}~{}", proxy.metadata.namespace, proxy.metadata.name)
}

/// Listener name for a gateway bind address
pub fn listener_name(bind_address: &str, bind_port: u16) -> String {
    format!("listener-{}-{}", bind_address, bind_port)
}

/// Route configuration name requested by a listener
pub fn route_config_name(listener_name: &str) -> String {
    format!("{}-routes", listener_name)
}

// =============================================================================
// Gateway translation
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGatewayTranslator;

/// Options inherited by delegated routes that set none of their own
#[derive(Debug, Clone, Default)]
struct ResolvedOptions {
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    prefix_rewrite: Option<String>,
}

struct RouteFlattener<'a> {
    snapshot: &'a GatewaySnapshot,
    reports: &'a mut ResourceReports,
}

impl RouteFlattener<'_> {
    fn resolve_options(
        &mut self,
        route: &RouteSpec,
        source: &ResourceKey,
        inherited: &ResolvedOptions,
    ) -> ResolvedOptions {
        let Some(options_ref) = &route.options else {
            return inherited.clone();
        };
        match self.snapshot.route_option(options_ref) {
            Some(option) => {
                self.reports
                    .accept(option.resource_key(), &option.metadata.resource_version);
                ResolvedOptions {
                    timeout_ms: option.timeout_ms,
                    retries: option.retries,
                    prefix_rewrite: option.prefix_rewrite.clone(),
                }
            }
            None => {
                self.reports.add_error(
                    source.clone(),
                    format!("route {}: route option {} not found", route.name, options_ref),
                );
                inherited.clone()
            }
        }
    }

    /// Flatten routes, following delegation to route tables
    fn flatten(
        &mut self,
        routes: &[RouteSpec],
        source: &ResourceKey,
        parent_prefix: &str,
        inherited: &ResolvedOptions,
        visited: &mut Vec<ResourceRef>,
        out: &mut Vec<ProxyRoute>,
    ) {
        for route in routes {
            if !route.prefix.starts_with(parent_prefix) {
                self.reports.add_error(
                    source.clone(),
                    format!(
                        "route {}: prefix {} must start with delegating prefix {}",
                        route.name, route.prefix, parent_prefix
                    ),
                );
                continue;
            }
            let options = self.resolve_options(route, source, inherited);

            let action = match &route.action {
                RouteSpecAction::Upstream(upstream) => ProxyRouteAction::Upstream(upstream.clone()),
                RouteSpecAction::DirectResponse { status, body } => {
                    ProxyRouteAction::DirectResponse {
                        status: *status,
                        body: body.clone(),
                    }
                }
                RouteSpecAction::Delegate(table_ref) => {
                    self.delegate(route, table_ref, source, &options, visited, out);
                    continue;
                }
            };

            out.push(ProxyRoute {
                name: route.name.clone(),
                prefix: route.prefix.clone(),
                action,
                timeout_ms: options.timeout_ms,
                retries: options.retries,
                prefix_rewrite: options.prefix_rewrite,
                source: source.clone(),
            });
        }
    }

    fn delegate(
        &mut self,
        route: &RouteSpec,
        table_ref: &ResourceRef,
        source: &ResourceKey,
        options: &ResolvedOptions,
        visited: &mut Vec<ResourceRef>,
        out: &mut Vec<ProxyRoute>,
    ) {
        if visited.contains(table_ref) {
            let chain: Vec<String> = visited.iter().map(|r| r.to_string()).collect();
            self.reports.add_error(
                source.clone(),
                format!(
                    "route {}: delegation cycle detected: {} -> {}",
                    route.name,
                    chain.join(" -> "),
                    table_ref
                ),
            );
            return;
        }
        let snapshot = self.snapshot;
        let Some(table) = snapshot.route_table(table_ref) else {
            self.reports.add_error(
                source.clone(),
                format!("route {}: route table {} not found", route.name, table_ref),
            );
            return;
        };

        let table_key = table.resource_key();
        self.reports
            .accept(table_key.clone(), &table.metadata.resource_version);

        visited.push(table_ref.clone());
        self.flatten(&table.routes, &table_key, &route.prefix, options, visited, out);
        visited.pop();
    }
}

impl DefaultGatewayTranslator {
    fn selected_virtual_services<'a>(
        snapshot: &'a GatewaySnapshot,
        gateway: &Gateway,
        reports: &mut ResourceReports,
    ) -> Vec<&'a VirtualService> {
        if gateway.virtual_services.is_empty() {
            let mut all: Vec<&VirtualService> = snapshot.virtual_services.iter().collect();
            all.sort_by_key(|vs| vs.resource_ref());
            return all;
        }
        gateway
            .virtual_services
            .iter()
            .filter_map(|vs_ref| {
                let found = snapshot.virtual_service(vs_ref);
                if found.is_none() {
                    reports.add_error(
                        gateway.resource_key(),
                        format!("virtual service {} not found", vs_ref),
                    );
                }
                found
            })
            .collect()
    }

    fn virtual_host(
        snapshot: &GatewaySnapshot,
        vs: &VirtualService,
        reports: &mut ResourceReports,
    ) -> ProxyVirtualHost {
        let vs_key = vs.resource_key();
        reports.accept(vs_key.clone(), &vs.metadata.resource_version);

        let mut retries = None;
        let mut response_headers = BTreeMap::new();
        if let Some(options_ref) = &vs.options {
            match snapshot.virtual_host_option(options_ref) {
                Some(option) => {
                    reports.accept(option.resource_key(), &option.metadata.resource_version);
                    retries = option.retries;
                    response_headers = option.response_headers.clone();
                }
                None => reports.add_error(
                    vs_key.clone(),
                    format!("virtual host option {} not found", options_ref),
                ),
            }
        }

        let mut routes = Vec::new();
        let mut flattener = RouteFlattener { snapshot, reports };
        flattener.flatten(
            &vs.routes,
            &vs_key,
            "",
            &ResolvedOptions::default(),
            &mut Vec::new(),
            &mut routes,
        );

        ProxyVirtualHost {
            name: vs.resource_ref().to_string(),
            domains: vs.domains.clone(),
            routes,
            retries,
            response_headers,
            source: vs.resource_ref(),
        }
    }
}

impl GatewayTranslator for DefaultGatewayTranslator {
    fn translate(
        &self,
        snapshot: &GatewaySnapshot,
        proxy_name: &str,
        write_namespace: &str,
    ) -> (Option<Proxy>, ResourceReports) {
        let mut reports = ResourceReports::new();
        let mut gateways: Vec<&Gateway> = snapshot
            .gateways
            .iter()
            .filter(|gw| gateway_proxy_names(gw).iter().any(|n| n == proxy_name))
            .collect();
        if gateways.is_empty() {
            return (None, reports);
        }
        gateways.sort_by_key(|gw| gw.resource_ref());

        let mut proxy = Proxy::new(write_namespace, proxy_name);
        let mut bound: BTreeMap<(String, u16), ResourceRef> = BTreeMap::new();

        for gateway in gateways {
            let gw_key = gateway.resource_key();
            reports.accept(gw_key.clone(), &gateway.metadata.resource_version);

            let bind = (gateway.bind_address.clone(), gateway.bind_port);
            if let Some(owner) = bound.get(&bind) {
                reports.add_error(
                    gw_key,
                    format!(
                        "bind address {}:{} already used by gateway {}",
                        bind.0, bind.1, owner
                    ),
                );
                continue;
            }
            bound.insert(bind, gateway.resource_ref());

            let mut domains: BTreeMap<String, ResourceRef> = BTreeMap::new();
            let mut virtual_hosts = Vec::new();
            for vs in Self::selected_virtual_services(snapshot, gateway, &mut reports) {
                if let Some((domain, owner)) = vs
                    .domains
                    .iter()
                    .find_map(|d| domains.get(d).map(|owner| (d, owner)))
                {
                    reports.add_error(
                        vs.resource_key(),
                        format!(
                            "domain {} on gateway {} is already served by virtual service {}",
                            domain,
                            gateway.resource_ref(),
                            owner
                        ),
                    );
                    continue;
                }
                for domain in &vs.domains {
                    domains.insert(domain.clone(), vs.resource_ref());
                }
                virtual_hosts.push(Self::virtual_host(snapshot, vs, &mut reports));
            }

            proxy.listeners.push(ProxyListener {
                name: listener_name(&gateway.bind_address, gateway.bind_port),
                bind_address: gateway.bind_address.clone(),
                bind_port: gateway.bind_port,
                virtual_hosts,
                source: gateway.resource_ref(),
            });
        }

        debug!(
            proxy = %proxy_name,
            listeners = proxy.listeners.len(),
            "Translated gateways into proxy"
        );
        (Some(proxy), reports)
    }
}

// =============================================================================
// xDS translation
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultXdsTranslator;

impl DefaultXdsTranslator {
    fn upstream_resources(
        snapshot: &DeclarativeSnapshot,
        reports: &mut ResourceReports,
    ) -> (Vec<Cluster>, Vec<ClusterLoadAssignment>) {
        let mut clusters = Vec::new();
        let mut assignments = Vec::new();

        for upstream in &snapshot.upstreams {
            let key = upstream.resource_key();
            reports.accept(key.clone(), &upstream.metadata.resource_version);

            let cluster_name = upstream.cluster_name();
            let mut endpoints = Vec::new();
            for host in &upstream.hosts {
                match host.address.parse::<IpAddr>() {
                    Ok(ip) => endpoints.push(Endpoint::new(SocketAddr::new(ip, host.port))),
                    Err(_) => reports.add_error(
                        key.clone(),
                        format!("invalid host address {}", host.address),
                    ),
                }
            }
            if upstream.hosts.is_empty() {
                reports.add_warning(key.clone(), "upstream has no hosts");
            }

            let mut assignment = ClusterLoadAssignment::new(cluster_name.clone());
            assignment.add_locality(Locality::default(), endpoints, 1);
            assignments.push(assignment);
            clusters.push(Cluster::new_eds(cluster_name).with_source(key));
        }

        (clusters, assignments)
    }

    fn route(
        snapshot: &DeclarativeSnapshot,
        route: &ProxyRoute,
        reports: &mut ResourceReports,
    ) -> Route {
        let action = match &route.action {
            ProxyRouteAction::Upstream(upstream) => {
                if snapshot.upstream(upstream).is_none() {
                    reports.add_error(
                        route.source.clone(),
                        format!("route {}: upstream {} not found", route.name, upstream),
                    );
                }
                let mut destination = RouteDestination::cluster(upstream_cluster_name(upstream));
                destination.timeout_ms = route.timeout_ms;
                destination.prefix_rewrite = route.prefix_rewrite.clone();
                destination.retry_policy = route.retries.map(retry_policy);
                RouteAction::Route(destination)
            }
            ProxyRouteAction::DirectResponse { status, body } => {
                if !(100..=599).contains(status) {
                    reports.add_error(
                        route.source.clone(),
                        format!("route {}: invalid direct response status {}", route.name, status),
                    );
                }
                RouteAction::DirectResponse(DirectResponseAction::new(*status, body.clone()))
            }
        };

        Route::new(route.name.clone(), RouteMatch::prefix(route.prefix.clone()), action)
            .with_source(route.source.clone())
    }
}

fn retry_policy(num_retries: u32) -> RetryPolicy {
    RetryPolicy {
        retry_on: vec!["5xx".to_string(), "connect-failure".to_string()],
        num_retries,
        per_try_timeout_ms: None,
    }
}

impl XdsTranslator for DefaultXdsTranslator {
    fn translate(
        &self,
        snapshot: &DeclarativeSnapshot,
        proxy: &Proxy,
    ) -> Result<(XdsSnapshot, ResourceReports)> {
        let mut reports = ResourceReports::new();
        let proxy_key = ResourceKey::new(ResourceKind::Proxy, proxy.resource_ref());
        reports.accept(proxy_key.clone(), &proxy.metadata.resource_version);

        let (clusters, endpoints) = Self::upstream_resources(snapshot, &mut reports);

        let mut listeners = Vec::new();
        let mut route_configs = Vec::new();
        for listener in &proxy.listeners {
            if listener.bind_port == 0 {
                reports.add_error(
                    proxy_key.clone(),
                    format!("listener {} has no bind port", listener.name),
                );
                continue;
            }

            let routes_name = route_config_name(&listener.name);
            let mut route_config = RouteConfiguration::new(routes_name.clone());
            for vh in &listener.virtual_hosts {
                let mut vhost = VirtualHost::new(vh.name.clone(), vh.domains.clone());
                vhost.retry_policy = vh.retries.map(retry_policy);
                vhost.response_headers_to_add = header_options(&vh.response_headers);
                vhost.routes = vh
                    .routes
                    .iter()
                    .map(|r| Self::route(snapshot, r, &mut reports))
                    .collect();
                route_config.virtual_hosts.push(vhost);
            }
            route_configs.push(route_config);

            listeners.push(
                Listener::new(
                    listener.name.clone(),
                    ListenerAddress::tcp(listener.bind_address.clone(), listener.bind_port),
                )
                .with_filter_chain(
                    FilterChain::new(format!("{}-http", listener.name))
                        .with_filter(NetworkFilter::http_connection_manager(routes_name)),
                ),
            );
        }

        let xds = XdsSnapshot::from_resources(endpoints, clusters, route_configs, listeners)?;
        debug!(
            proxy = %proxy.resource_ref(),
            resources = xds.resource_count(),
            "Translated proxy into xDS snapshot"
        );
        Ok((xds, reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RouteOption, RouteTable, Upstream};
    use crate::xds::ResourceType;

    fn vs_ref(name: &str) -> ResourceRef {
        ResourceRef::new("default", name)
    }

    fn base_snapshot() -> DeclarativeSnapshot {
        DeclarativeSnapshot {
            gateways: vec![Gateway::new("skiff-system", "gateway-proxy", 8080)],
            virtual_services: vec![
                VirtualService::new("default", "petstore", vec!["petstore.example.com".to_string()])
                    .with_route(RouteSpec::to_upstream("pets", "/pets", vs_ref("petstore"))),
            ],
            upstreams: vec![Upstream::new("default", "petstore").with_host("10.0.0.1", 8080)],
            ..Default::default()
        }
    }

    #[test]
    fn test_proxy_names() {
        let gateways = vec![
            Gateway::new("ns", "a", 80),
            Gateway::new("ns", "b", 443).with_proxy_name("gateway-proxy-ssl"),
            Gateway::new("ns", "c", 8443)
                .with_proxy_name("gateway-proxy-ssl")
                .with_proxy_name("gateway-proxy"),
        ];
        assert_eq!(
            proxy_names(&gateways),
            vec!["gateway-proxy".to_string(), "gateway-proxy-ssl".to_string()]
        );
        assert!(proxy_names(&[]).is_empty());
    }

    #[test]
    fn test_node_key() {
        assert_eq!(
            node_key(&Proxy::new("skiff-system", "gateway-proxy")),
            "skiff-system~gateway-proxy"
        );
    }

    #[test]
    fn test_gateway_translation() {
        let snapshot = base_snapshot();
        let (proxy, reports) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );

        let proxy = proxy.unwrap();
        assert_eq!(proxy.metadata.namespace, "skiff-system");
        assert_eq!(proxy.listeners.len(), 1);
        assert_eq!(proxy.listeners[0].name, "listener-::-8080");
        assert_eq!(proxy.listeners[0].virtual_hosts[0].routes.len(), 1);
        assert!(!reports.has_errors());
    }

    #[test]
    fn test_gateway_translation_without_gateways() {
        let snapshot = base_snapshot();
        let (proxy, reports) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "other-proxy",
            "skiff-system",
        );
        assert!(proxy.is_none());
        assert!(reports.is_empty());
    }

    #[test]
    fn test_delegation_and_options() {
        let mut snapshot = base_snapshot();
        snapshot.virtual_services[0] =
            VirtualService::new("default", "petstore", vec!["*".to_string()]).with_route(
                RouteSpec::delegate("api", "/api", vs_ref("api-table"))
                    .with_options(vs_ref("slow")),
            );
        snapshot.route_tables = vec![RouteTable::new("default", "api-table")
            .with_route(RouteSpec::to_upstream("pets", "/api/pets", vs_ref("petstore")))
            .with_route(RouteSpec::to_upstream("escape", "/other", vs_ref("petstore")))];
        snapshot.route_options = vec![RouteOption {
            metadata: skiff_common::Metadata::new("default", "slow"),
            timeout_ms: Some(30_000),
            ..Default::default()
        }];

        let (proxy, reports) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );
        let routes = &proxy.unwrap().listeners[0].virtual_hosts[0].routes;

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].timeout_ms, Some(30_000));
        assert_eq!(routes[0].source.kind, ResourceKind::RouteTable);

        let table_key = ResourceKey::new(ResourceKind::RouteTable, vs_ref("api-table"));
        assert!(reports.has_errors_for(&table_key));
    }

    #[test]
    fn test_delegation_cycle_is_reported() {
        let mut snapshot = base_snapshot();
        snapshot.virtual_services[0] =
            VirtualService::new("default", "petstore", vec!["*".to_string()])
                .with_route(RouteSpec::delegate("a", "/", vs_ref("rt-a")));
        snapshot.route_tables = vec![
            RouteTable::new("default", "rt-a")
                .with_route(RouteSpec::delegate("b", "/", vs_ref("rt-b"))),
            RouteTable::new("default", "rt-b")
                .with_route(RouteSpec::delegate("a", "/", vs_ref("rt-a"))),
        ];

        let (_, reports) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );
        let rt_b = ResourceKey::new(ResourceKind::RouteTable, vs_ref("rt-b"));
        let report = reports.get(&rt_b).unwrap();
        assert!(report.errors[0].contains("delegation cycle"));
    }

    #[test]
    fn test_duplicate_domain_is_reported() {
        let mut snapshot = base_snapshot();
        snapshot.virtual_services.push(VirtualService::new(
            "default",
            "zz-duplicate",
            vec!["petstore.example.com".to_string()],
        ));

        let (proxy, reports) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );
        assert_eq!(proxy.unwrap().listeners[0].virtual_hosts.len(), 1);
        let dup = ResourceKey::new(ResourceKind::VirtualService, vs_ref("zz-duplicate"));
        assert!(reports.has_errors_for(&dup));
    }

    #[test]
    fn test_xds_translation_is_consistent() {
        let snapshot = base_snapshot();
        let (proxy, _) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );

        let (xds, reports) = DefaultXdsTranslator
            .translate(&snapshot, &proxy.unwrap())
            .unwrap();
        assert!(xds.consistent().is_ok());
        assert!(!reports.has_errors());
        assert_eq!(xds.resources(ResourceType::Cluster).items.len(), 1);
        assert!(xds.routes.items.contains_key("listener-::-8080-routes"));
    }

    #[test]
    fn test_xds_translation_reports_missing_upstream_and_bad_host() {
        let mut snapshot = base_snapshot();
        snapshot.upstreams = vec![Upstream::new("default", "other").with_host("not-an-ip", 80)];
        let (proxy, _) = DefaultGatewayTranslator.translate(
            &snapshot.gateway_snapshot(),
            "gateway-proxy",
            "skiff-system",
        );

        let (_, reports) = DefaultXdsTranslator
            .translate(&snapshot, &proxy.unwrap())
            .unwrap();
        assert!(reports.has_errors_for(&ResourceKey::new(
            ResourceKind::VirtualService,
            vs_ref("petstore")
        )));
        assert!(reports.has_errors_for(&ResourceKey::new(ResourceKind::Upstream, vs_ref("other"))));
    }
}
