//! xDS snapshot sanitizers
//!
//! A proxy rejects a whole update when any fragment is invalid, so before a
//! snapshot is published the sanitizers rewrite the fragments generated from
//! rejected resources. Sanitizers run in order; the first error aborts the
//! chain and nothing is published for that pass.

use std::collections::BTreeSet;

use skiff_common::{Result, SkiffError};
use tracing::{debug, warn};

use crate::api::{InvalidConfigPolicy, Settings};
use crate::report::ResourceReports;
use crate::snapshot::XdsSnapshot;
use crate::xds::types::{DirectResponseAction, Route, RouteAction};

/// A snapshot rewriting stage
pub trait XdsSanitizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `snapshot` given the reports gathered so far in the pass
    fn sanitize(&self, snapshot: XdsSnapshot, reports: &ResourceReports) -> Result<XdsSnapshot>;
}

/// Sanitizers applied in registration order
#[derive(Default)]
pub struct SanitizerChain {
    sanitizers: Vec<Box<dyn XdsSanitizer>>,
}

impl SanitizerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: drop rejected upstreams, then fix the routes that
    /// pointed at them or were themselves rejected
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with(UpstreamRemovingSanitizer)
            .with(RouteReplacingSanitizer::new(
                settings.invalid_config_policy.as_ref(),
            ))
    }

    pub fn with(mut self, sanitizer: impl XdsSanitizer + 'static) -> Self {
        self.sanitizers.push(Box::new(sanitizer));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sanitizers.iter().map(|s| s.name()).collect()
    }

    pub fn sanitize(
        &self,
        mut snapshot: XdsSnapshot,
        reports: &ResourceReports,
    ) -> Result<XdsSnapshot> {
        for sanitizer in &self.sanitizers {
            snapshot = sanitizer
                .sanitize(snapshot, reports)
                .map_err(|e| match e {
                    SkiffError::Sanitization { .. } => e,
                    other => SkiffError::Sanitization {
                        sanitizer: sanitizer.name().to_string(),
                        reason: other.to_string(),
                    },
                })?;
        }

        snapshot.consistent().map_err(|e| SkiffError::Sanitization {
            sanitizer: "consistency".to_string(),
            reason: e.to_string(),
        })?;
        Ok(snapshot)
    }
}

/// Replaces (or drops) routes that would be rejected by the proxy
///
/// A route is invalid when the resource that authored it has errors, or
/// when it forwards to a cluster missing from the snapshot.
pub struct RouteReplacingSanitizer {
    replace: bool,
    response_code: u32,
    response_body: String,
}

impl RouteReplacingSanitizer {
    /// Build from the configured policy; an absent policy replaces with the defaults
    pub fn new(policy: Option<&InvalidConfigPolicy>) -> Self {
        let policy = policy.cloned().unwrap_or_default();
        Self {
            replace: policy.replace_invalid_routes,
            response_code: policy.invalid_route_response_code,
            response_body: policy.invalid_route_response_body,
        }
    }

    fn invalid_reason(
        &self,
        route: &Route,
        clusters: &BTreeSet<String>,
        reports: &ResourceReports,
    ) -> Option<String> {
        if let Some(source) = &route.source {
            if reports.has_errors_for(source) {
                return Some(format!("source {} has errors", source));
            }
        }
        route
            .action
            .cluster_names()
            .into_iter()
            .find(|c| !clusters.contains(*c))
            .map(|c| format!("destination cluster {} not found", c))
    }
}

impl XdsSanitizer for RouteReplacingSanitizer {
    fn name(&self) -> &'static str {
        "route-replacing"
    }

    fn sanitize(
        &self,
        mut snapshot: XdsSnapshot,
        reports: &ResourceReports,
    ) -> Result<XdsSnapshot> {
        if self.replace && !(200..=599).contains(&self.response_code) {
            return Err(SkiffError::Sanitization {
                sanitizer: self.name().to_string(),
                reason: format!(
                    "invalid route response code {} must be between 200 and 599",
                    self.response_code
                ),
            });
        }

        let clusters: BTreeSet<String> = snapshot.clusters.items.keys().cloned().collect();
        let mut rewritten = 0usize;

        for route_config in snapshot.routes.items.values_mut() {
            for vhost in &mut route_config.virtual_hosts {
                let routes = std::mem::take(&mut vhost.routes);
                for mut route in routes {
                    let Some(reason) = self.invalid_reason(&route, &clusters, reports) else {
                        vhost.routes.push(route);
                        continue;
                    };
                    rewritten += 1;
                    warn!(
                        route_config = %route_config.name,
                        route = %route.name,
                        reason = %reason,
                        replace = self.replace,
                        "Sanitizing invalid route"
                    );
                    if self.replace {
                        route.action = RouteAction::DirectResponse(DirectResponseAction::new(
                            self.response_code,
                            Some(self.response_body.clone()),
                        ));
                        vhost.routes.push(route);
                    }
                }
            }
        }

        if rewritten > 0 {
            snapshot.routes.refresh_version()?;
        }
        Ok(snapshot)
    }
}

/// Removes clusters generated from rejected upstreams, with their endpoints
pub struct UpstreamRemovingSanitizer;

impl XdsSanitizer for UpstreamRemovingSanitizer {
    fn name(&self) -> &'static str {
        "upstream-removing"
    }

    fn sanitize(
        &self,
        mut snapshot: XdsSnapshot,
        reports: &ResourceReports,
    ) -> Result<XdsSnapshot> {
        let rejected: Vec<String> = snapshot
            .clusters
            .items
            .iter()
            .filter(|(_, c)| c.source.as_ref().is_some_and(|s| reports.has_errors_for(s)))
            .map(|(name, _)| name.clone())
            .collect();
        if rejected.is_empty() {
            return Ok(snapshot);
        }

        let mut orphaned = BTreeSet::new();
        for name in &rejected {
            if let Some(cluster) = snapshot.clusters.items.remove(name) {
                if let Some(endpoints) = cluster.endpoint_reference() {
                    orphaned.insert(endpoints.to_string());
                }
            }
        }
        for cluster in snapshot.clusters.items.values() {
            if let Some(endpoints) = cluster.endpoint_reference() {
                orphaned.remove(endpoints);
            }
        }
        for endpoints in &orphaned {
            snapshot.endpoints.items.remove(endpoints);
        }

        debug!(
            clusters = ?rejected,
            endpoints = orphaned.len(),
            "Removed rejected upstream clusters"
        );
        snapshot.clusters.refresh_version()?;
        snapshot.endpoints.refresh_version()?;
        Ok(snapshot)
    }
}
