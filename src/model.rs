use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

pub const CLUSTER_WIDE_GROUP_ID: &str = "group/cluster-wide";
pub const CLUSTER_WIDE_GROUP_LABEL: &str = "cluster-wide";

/// Cluster-scoped resource kinds the gateway knows how to list.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ClusterWideKind {
    Nodes,
    PersistentVolumes,
    StorageClasses,
    IngressClasses,
    ClusterRoles,
    ClusterRoleBindings,
    CustomResourceDefinitions,
}

impl ClusterWideKind {
    pub const ALL: [Self; 7] = [
        Self::Nodes,
        Self::PersistentVolumes,
        Self::StorageClasses,
        Self::IngressClasses,
        Self::ClusterRoles,
        Self::ClusterRoleBindings,
        Self::CustomResourceDefinitions,
    ];

    pub fn kind(self) -> &'static str {
        match self {
            Self::Nodes => "Node",
            Self::PersistentVolumes => "PersistentVolume",
            Self::StorageClasses => "StorageClass",
            Self::IngressClasses => "IngressClass",
            Self::ClusterRoles => "ClusterRole",
            Self::ClusterRoleBindings => "ClusterRoleBinding",
            Self::CustomResourceDefinitions => "CustomResourceDefinition",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "node" | "nodes" | "no" => Some(Self::Nodes),
            "pv" | "persistentvolume" | "persistentvolumes" | "persistent-volume"
            | "persistent-volumes" => Some(Self::PersistentVolumes),
            "sc" | "storageclass" | "storageclasses" | "storage-class" | "storage-classes" => {
                Some(Self::StorageClasses)
            }
            "ingclass" | "ingressclass" | "ingressclasses" | "ingress-class"
            | "ingress-classes" | "ic" => Some(Self::IngressClasses),
            "crole" | "clusterrole" | "clusterroles" | "cluster-role" | "cluster-roles" => {
                Some(Self::ClusterRoles)
            }
            "crb"
            | "clusterrolebinding"
            | "clusterrolebindings"
            | "cluster-role-binding"
            | "cluster-role-bindings" => Some(Self::ClusterRoleBindings),
            "crd"
            | "crds"
            | "customresourcedefinition"
            | "customresourcedefinitions" => Some(Self::CustomResourceDefinitions),
            _ => None,
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

/// Kind tag of a node in the domain tree.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum EntityKind {
    Cluster,
    HierarchyGroup,
    Namespace,
    ClusterWideObjectGroup { kind: String },
    ClusterWideObject { kind: String },
    Pod,
    Container,
}

impl EntityKind {
    /// Structural nodes render as group containers.
    pub fn is_group(&self) -> bool {
        match self {
            Self::Cluster
            | Self::HierarchyGroup
            | Self::Namespace
            | Self::ClusterWideObjectGroup { .. }
            | Self::Pod => true,
            Self::ClusterWideObject { .. } | Self::Container => false,
        }
    }

    /// Kind name used by the object-kind filter facet; `None` for structural groups.
    pub fn object_kind(&self) -> Option<&str> {
        match self {
            Self::Pod => Some("Pod"),
            Self::Container => Some("Container"),
            Self::ClusterWideObject { kind } => Some(kind.as_str()),
            Self::Cluster
            | Self::HierarchyGroup
            | Self::Namespace
            | Self::ClusterWideObjectGroup { .. } => None,
        }
    }

    pub fn short_label(&self) -> &str {
        match self {
            Self::Cluster => "cluster",
            Self::HierarchyGroup => "group",
            Self::Namespace => "ns",
            Self::ClusterWideObjectGroup { kind } | Self::ClusterWideObject { kind } => kind,
            Self::Pod => "pod",
            Self::Container => "ctr",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => write!(f, "Cluster"),
            Self::HierarchyGroup => write!(f, "HierarchyGroup"),
            Self::Namespace => write!(f, "Namespace"),
            Self::ClusterWideObjectGroup { kind } => write!(f, "ClusterWideObjectGroup({kind})"),
            Self::ClusterWideObject { kind } => write!(f, "{kind}"),
            Self::Pod => write!(f, "Pod"),
            Self::Container => write!(f, "Container"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum GroupKind {
    Namespace,
    ClusterWideKind,
}

/// Identifies one lazily loadable branch: a namespace or a cluster-wide kind bucket.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LoadingGroupKey {
    pub group_kind: GroupKind,
    pub group_id: String,
}

impl LoadingGroupKey {
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            group_kind: GroupKind::Namespace,
            group_id: name.into(),
        }
    }

    pub fn cluster_wide(kind: impl Into<String>) -> Self {
        Self {
            group_kind: GroupKind::ClusterWideKind,
            group_id: kind.into(),
        }
    }

    /// Id of the domain node this key expands.
    pub fn node_id(&self) -> String {
        match self.group_kind {
            GroupKind::Namespace => namespace_node_id(&self.group_id),
            GroupKind::ClusterWideKind => cluster_wide_group_node_id(&self.group_id),
        }
    }
}

impl Display for LoadingGroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.group_kind {
            GroupKind::Namespace => write!(f, "namespace {}", self.group_id),
            GroupKind::ClusterWideKind => write!(f, "{} objects", self.group_id),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionRef {
    pub source_id: String,
    pub target_id: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntityNode {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub health: HealthStatus,
    pub api_versions: BTreeSet<String>,
    pub children: Vec<EntityNode>,
    pub connections: Vec<ConnectionRef>,
    pub group_key: Option<LoadingGroupKey>,
    pub loaded: bool,
}

impl EntityNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            health: HealthStatus::Unknown,
            api_versions: BTreeSet::new(),
            children: Vec::new(),
            connections: Vec::new(),
            group_key: None,
            loaded: true,
        }
    }

    /// A lazily loadable group whose contents have not been fetched yet.
    pub fn is_placeholder(&self) -> bool {
        self.group_key.is_some() && !self.loaded
    }

    pub fn find(&self, id: &str) -> Option<&EntityNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut EntityNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(EntityNode::node_count)
            .sum::<usize>()
    }

    /// Pre-order walk with the parent id of each node.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a EntityNode, Option<&'a str>)) {
        fn inner<'a>(
            node: &'a EntityNode,
            parent: Option<&'a str>,
            visit: &mut impl FnMut(&'a EntityNode, Option<&'a str>),
        ) {
            visit(node, parent);
            for child in &node.children {
                inner(child, Some(node.id.as_str()), visit);
            }
        }
        inner(self, None, visit);
    }

    pub fn leaves(&self) -> Vec<&EntityNode> {
        let mut out = Vec::new();
        self.walk(&mut |node, _| {
            if !node.kind.is_group() {
                out.push(node);
            }
        });
        out
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ObjectKind {
    Namespace,
    Pod,
    Container,
    ClusterWide(String),
}

impl ObjectKind {
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Namespace => "Namespace",
            Self::Pod => "Pod",
            Self::Container => "Container",
            Self::ClusterWide(kind) => kind.as_str(),
        }
    }
}

/// Raw object as listed from the cluster, before it is placed in the tree.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClusterObject {
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub health: HealthStatus,
    pub api_version: Option<String>,
    pub depends_on: Vec<String>,
}

impl ClusterObject {
    pub fn namespace(name: &str) -> Self {
        Self {
            id: namespace_node_id(name),
            name: name.to_string(),
            kind: ObjectKind::Namespace,
            namespace: None,
            pod: None,
            health: HealthStatus::Healthy,
            api_version: Some("v1".to_string()),
            depends_on: Vec::new(),
        }
    }

    pub fn pod(namespace: &str, name: &str) -> Self {
        Self {
            id: pod_id(namespace, name),
            name: name.to_string(),
            kind: ObjectKind::Pod,
            namespace: Some(namespace.to_string()),
            pod: None,
            health: HealthStatus::Unknown,
            api_version: Some("v1".to_string()),
            depends_on: Vec::new(),
        }
    }

    pub fn container(namespace: &str, pod: &str, name: &str) -> Self {
        Self {
            id: container_id(namespace, pod, name),
            name: name.to_string(),
            kind: ObjectKind::Container,
            namespace: Some(namespace.to_string()),
            pod: Some(pod.to_string()),
            health: HealthStatus::Unknown,
            api_version: None,
            depends_on: Vec::new(),
        }
    }

    pub fn cluster_wide(kind: &str, name: &str) -> Self {
        Self {
            id: cluster_wide_object_id(kind, name),
            name: name.to_string(),
            kind: ObjectKind::ClusterWide(kind.to_string()),
            namespace: None,
            pod: None,
            health: HealthStatus::Unknown,
            api_version: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn depending_on(mut self, target_id: impl Into<String>) -> Self {
        self.depends_on.push(target_id.into());
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClusterRef {
    pub id: String,
    pub name: String,
}

impl ClusterRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn node_id(&self) -> String {
        format!("cluster/{}", self.id)
    }
}

/// Listing of the top-level skeleton: namespaces plus the cluster-wide kinds present.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterSkeleton {
    pub namespaces: Vec<ClusterObject>,
    pub cluster_wide_kinds: Vec<String>,
}

pub fn namespace_node_id(name: &str) -> String {
    format!("ns/{name}")
}

pub fn cluster_wide_group_node_id(kind: &str) -> String {
    format!("cwo/{kind}")
}

pub fn pod_id(namespace: &str, name: &str) -> String {
    format!("pod/{namespace}/{name}")
}

pub fn container_id(namespace: &str, pod: &str, name: &str) -> String {
    format!("container/{namespace}/{pod}/{name}")
}

pub fn cluster_wide_object_id(kind: &str, name: &str) -> String {
    format!("{}/{name}", kind.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::{ClusterWideKind, EntityKind, LoadingGroupKey};

    #[test]
    fn cluster_wide_aliases_map_to_expected_kinds() {
        assert_eq!(
            ClusterWideKind::from_token("pv"),
            Some(ClusterWideKind::PersistentVolumes)
        );
        assert_eq!(
            ClusterWideKind::from_token("cluster-role-bindings"),
            Some(ClusterWideKind::ClusterRoleBindings)
        );
        assert_eq!(
            ClusterWideKind::from_token("crd"),
            Some(ClusterWideKind::CustomResourceDefinitions)
        );
        assert_eq!(ClusterWideKind::from_token("pods"), None);
        assert_eq!(
            ClusterWideKind::from_kind("StorageClass"),
            Some(ClusterWideKind::StorageClasses)
        );
    }

    #[test]
    fn group_keys_point_at_their_tree_nodes() {
        assert_eq!(LoadingGroupKey::namespace("default").node_id(), "ns/default");
        assert_eq!(LoadingGroupKey::cluster_wide("Node").node_id(), "cwo/Node");
    }

    #[test]
    fn only_objects_carry_an_object_kind() {
        assert_eq!(EntityKind::Pod.object_kind(), Some("Pod"));
        assert_eq!(
            EntityKind::ClusterWideObject {
                kind: "Node".to_string()
            }
            .object_kind(),
            Some("Node")
        );
        assert_eq!(EntityKind::Namespace.object_kind(), None);
        assert!(EntityKind::Pod.is_group());
        assert!(!EntityKind::Container.is_group());
    }
}
