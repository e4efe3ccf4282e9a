//! Shared fixtures for skiff-mesh integration tests

#![allow(dead_code)]

use skiff_common::{GENERATED_BY_LABEL, ResourceKey, ResourceKind, ResourceRef};
use skiff_mesh::api::{DeclarativeSnapshot, Gateway, Proxy, RouteSpec, Upstream, VirtualService};
use skiff_mesh::snapshot::XdsSnapshot;
use skiff_mesh::xds::types::{
    Cluster, ClusterLoadAssignment, Endpoint, FilterChain, Listener, ListenerAddress, Locality,
    NetworkFilter, Route, RouteAction, RouteConfiguration, RouteDestination, RouteMatch,
    VirtualHost,
};

pub const WRITE_NAMESPACE: &str = "skiff-system";
pub const MARKER: &str = "skiff-gateway";
pub const DEFAULT_NODE: &str = "skiff-system~gateway-proxy";
pub const ROUTE_CONFIG: &str = "listener-::-8080-routes";

pub fn vs_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::VirtualService, ResourceRef::new("default", name))
}

pub fn upstream_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Upstream, ResourceRef::new("default", name))
}

/// One gateway serving one virtual service that routes `/pets` to `upstream`
pub fn petstore(upstream: &str) -> DeclarativeSnapshot {
    DeclarativeSnapshot {
        gateways: vec![Gateway::new(WRITE_NAMESPACE, "gateway-proxy", 8080)],
        virtual_services: vec![
            VirtualService::new("default", "petstore", vec!["petstore.example.com".to_string()])
                .with_route(RouteSpec::to_upstream(
                    "pets",
                    "/pets",
                    ResourceRef::new("default", upstream),
                )),
        ],
        upstreams: vec![Upstream::new("default", "petstore").with_host("10.0.0.1", 8080)],
        ..Default::default()
    }
}

/// Consistent snapshot: listener -> route config -> EDS cluster -> endpoints
pub fn routed_xds(cluster: &str) -> XdsSnapshot {
    let mut assignment = ClusterLoadAssignment::new(cluster);
    assignment.add_locality(
        Locality::default(),
        vec![Endpoint::new("10.0.0.1:8080".parse().unwrap())],
        1,
    );
    let route_config = RouteConfiguration::new("http-routes").with_virtual_host(
        VirtualHost::new("default", vec!["*".to_string()]).with_route(Route::new(
            "all",
            RouteMatch::prefix("/"),
            RouteAction::Route(RouteDestination::cluster(cluster)),
        )),
    );
    let listener = Listener::new("http", ListenerAddress::tcp("0.0.0.0", 8080)).with_filter_chain(
        FilterChain::new("http").with_filter(NetworkFilter::http_connection_manager("http-routes")),
    );

    XdsSnapshot::from_resources(
        vec![assignment],
        vec![Cluster::new_eds(cluster)],
        vec![route_config],
        vec![listener],
    )
    .unwrap()
}

pub fn generated_proxy(name: &str) -> Proxy {
    let mut proxy = Proxy::new(WRITE_NAMESPACE, name);
    proxy
        .metadata
        .labels
        .insert(GENERATED_BY_LABEL.to_string(), MARKER.to_string());
    proxy
}
