//! xDS Resource Snapshot
//!
//! An [`XdsSnapshot`] is one versioned bundle of the four xDS collections for
//! a node. Collections are keyed by resource name in name order and carry
//! their own version string. A snapshot is only ever published whole; callers
//! rewrite a clone and publish the result instead of mutating a published
//! value in place.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skiff_common::{Result, SkiffError};

use crate::xds::ResourceType;
use crate::xds::types::{Cluster, ClusterLoadAssignment, Listener, RouteConfiguration};

/// Version given to collections of the empty snapshot
pub const EMPTY_VERSION: &str = "empty";

/// Resources with a name
pub trait NamedResource {
    fn resource_name(&self) -> &str;
}

impl NamedResource for ClusterLoadAssignment {
    fn resource_name(&self) -> &str {
        &self.cluster_name
    }
}

impl NamedResource for Cluster {
    fn resource_name(&self) -> &str {
        &self.name
    }
}

impl NamedResource for RouteConfiguration {
    fn resource_name(&self) -> &str {
        &self.name
    }
}

impl NamedResource for Listener {
    fn resource_name(&self) -> &str {
        &self.name
    }
}

/// A versioned, name-ordered collection of one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources<T> {
    pub version: String,
    pub items: BTreeMap<String, T>,
}

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self {
            version: String::new(),
            items: BTreeMap::new(),
        }
    }
}

impl<T: NamedResource + Serialize> Resources<T> {
    /// Build a collection with an explicit version
    pub fn new(version: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            version: version.into(),
            items: items
                .into_iter()
                .map(|item| (item.resource_name().to_string(), item))
                .collect(),
        }
    }

    /// Build a collection versioned by a hash of its content
    pub fn hashed(items: Vec<T>) -> Result<Self> {
        let mut resources = Self::new(String::new(), items);
        resources.refresh_version()?;
        Ok(resources)
    }

    /// Recompute the content-hash version
    pub fn refresh_version(&mut self) -> Result<()> {
        self.version = content_version(&self.items)?;
        Ok(())
    }

    pub fn insert(&mut self, item: T) {
        self.items.insert(item.resource_name().to_string(), item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Hex sha256 of the canonical JSON form
fn content_version<T: Serialize>(items: &BTreeMap<String, T>) -> Result<String> {
    let bytes = serde_json::to_vec(items)
        .map_err(|e| SkiffError::Internal(format!("failed to hash resources: {}", e)))?;
    Ok(const_hex::encode(Sha256::digest(&bytes)))
}

/// A single xDS resource of any type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum XdsResource {
    Endpoint(ClusterLoadAssignment),
    Cluster(Cluster),
    Route(RouteConfiguration),
    Listener(Listener),
}

impl XdsResource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            XdsResource::Endpoint(_) => ResourceType::Endpoint,
            XdsResource::Cluster(_) => ResourceType::Cluster,
            XdsResource::Route(_) => ResourceType::Route,
            XdsResource::Listener(_) => ResourceType::Listener,
        }
    }
}

/// Version-tagged resources of one type, as served to proxies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedResources {
    pub version: String,
    pub items: BTreeMap<String, XdsResource>,
}

fn typed<T: Clone>(resources: &Resources<T>, wrap: fn(T) -> XdsResource) -> TypedResources {
    TypedResources {
        version: resources.version.clone(),
        items: resources
            .items
            .iter()
            .map(|(name, item)| (name.clone(), wrap(item.clone())))
            .collect(),
    }
}

/// A snapshot of the four xDS collections for one node
///
/// `Clone` produces a fully independent copy and `PartialEq` compares
/// membership, versions and payloads structurally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XdsSnapshot {
    pub endpoints: Resources<ClusterLoadAssignment>,
    pub clusters: Resources<Cluster>,
    pub routes: Resources<RouteConfiguration>,
    pub listeners: Resources<Listener>,
}

impl XdsSnapshot {
    /// Create a snapshot where every collection shares one version
    pub fn new(
        version: &str,
        endpoints: Vec<ClusterLoadAssignment>,
        clusters: Vec<Cluster>,
        routes: Vec<RouteConfiguration>,
        listeners: Vec<Listener>,
    ) -> Self {
        Self {
            endpoints: Resources::new(version, endpoints),
            clusters: Resources::new(version, clusters),
            routes: Resources::new(version, routes),
            listeners: Resources::new(version, listeners),
        }
    }

    /// Create a snapshot whose collection versions are content hashes
    pub fn from_resources(
        endpoints: Vec<ClusterLoadAssignment>,
        clusters: Vec<Cluster>,
        routes: Vec<RouteConfiguration>,
        listeners: Vec<Listener>,
    ) -> Result<Self> {
        Ok(Self {
            endpoints: Resources::hashed(endpoints)?,
            clusters: Resources::hashed(clusters)?,
            routes: Resources::hashed(routes)?,
            listeners: Resources::hashed(listeners)?,
        })
    }

    /// The snapshot served to nodes with nothing to receive
    pub fn empty() -> Self {
        Self::new(EMPTY_VERSION, vec![], vec![], vec![], vec![])
    }

    /// Recompute every collection version after an in-place rewrite
    pub fn refresh_versions(&mut self) -> Result<()> {
        self.endpoints.refresh_version()?;
        self.clusters.refresh_version()?;
        self.routes.refresh_version()?;
        self.listeners.refresh_version()?;
        Ok(())
    }

    /// Check that every cluster's endpoint reference and every listener's
    /// route reference resolve to exactly the set of names present
    pub fn consistent(&self) -> Result<()> {
        let endpoint_refs: BTreeSet<&str> = self
            .clusters
            .items
            .values()
            .filter_map(|c| c.endpoint_reference())
            .collect();
        check_references(ResourceType::Endpoint, &endpoint_refs, &self.endpoints.items)?;

        let route_refs: BTreeSet<&str> = self
            .listeners
            .items
            .values()
            .flat_map(|l| l.route_references())
            .collect();
        check_references(ResourceType::Route, &route_refs, &self.routes.items)
    }

    pub fn version(&self, resource_type: ResourceType) -> &str {
        match resource_type {
            ResourceType::Endpoint => &self.endpoints.version,
            ResourceType::Cluster => &self.clusters.version,
            ResourceType::Route => &self.routes.version,
            ResourceType::Listener => &self.listeners.version,
        }
    }

    /// Resources of one type
    pub fn resources(&self, resource_type: ResourceType) -> TypedResources {
        match resource_type {
            ResourceType::Endpoint => typed(&self.endpoints, XdsResource::Endpoint),
            ResourceType::Cluster => typed(&self.clusters, XdsResource::Cluster),
            ResourceType::Route => typed(&self.routes, XdsResource::Route),
            ResourceType::Listener => typed(&self.listeners, XdsResource::Listener),
        }
    }

    /// Resources for a discovery type URL; `None` for an unknown type
    pub fn get_resources(&self, type_url: &str) -> Option<TypedResources> {
        ResourceType::from_type_url(type_url).map(|t| self.resources(t))
    }

    pub fn resource_count(&self) -> usize {
        self.endpoints.len() + self.clusters.len() + self.routes.len() + self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }
}

fn check_references<T>(
    resource_type: ResourceType,
    references: &BTreeSet<&str>,
    items: &BTreeMap<String, T>,
) -> Result<()> {
    if references.len() != items.len() {
        return Err(SkiffError::Inconsistent(format!(
            "mismatched {} reference and resource lengths: {:?} != {}",
            resource_type,
            references,
            items.len()
        )));
    }

    let missing: Vec<&str> = references
        .iter()
        .copied()
        .filter(|name| !items.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(SkiffError::Inconsistent(format!(
            "{} references not found in snapshot: {:?}",
            resource_type, missing
        )));
    }

    Ok(())
}
