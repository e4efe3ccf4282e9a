//! Resource identity and metadata shared by declarative and generated resources

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// (namespace, name) pair identifying a resource of a given kind
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Kinds of resources the control plane reads, generates, or reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Gateway,
    VirtualService,
    RouteTable,
    RouteOption,
    VirtualHostOption,
    Upstream,
    Proxy,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Gateway => "Gateway",
            ResourceKind::VirtualService => "VirtualService",
            ResourceKind::RouteTable => "RouteTable",
            ResourceKind::RouteOption => "RouteOption",
            ResourceKind::VirtualHostOption => "VirtualHostOption",
            ResourceKind::Upstream => "Upstream",
            ResourceKind::Proxy => "Proxy",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gateway" => Ok(ResourceKind::Gateway),
            "VirtualService" => Ok(ResourceKind::VirtualService),
            "RouteTable" => Ok(ResourceKind::RouteTable),
            "RouteOption" => Ok(ResourceKind::RouteOption),
            "VirtualHostOption" => Ok(ResourceKind::VirtualHostOption),
            "Upstream" => Ok(ResourceKind::Upstream),
            "Proxy" => Ok(ResourceKind::Proxy),
            _ => Err(format!("Invalid resource kind: {}", s)),
        }
    }
}

/// A resource reference qualified by its kind
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub resource: ResourceRef,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, resource: ResourceRef) -> Self {
        Self { kind, resource }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.resource)
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    /// Labels used for selection and ownership markers
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Opaque version assigned by the store on write
    #[serde(default)]
    pub resource_version: String,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.namespace, &self.name)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|v| v.as_str())
    }

    /// True when every selector entry is present with the same value
    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|l| l == v))
    }
}

/// A typed resource with metadata
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    fn resource_ref(&self) -> ResourceRef {
        self.metadata().resource_ref()
    }

    fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(Self::KIND, self.resource_ref())
    }
}
