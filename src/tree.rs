use crate::model::{
    CLUSTER_WIDE_GROUP_ID, CLUSTER_WIDE_GROUP_LABEL, ClusterObject, ClusterRef, ClusterSkeleton,
    ConnectionRef, EntityKind, EntityNode, GroupKind, HealthStatus, LoadingGroupKey, ObjectKind,
    cluster_wide_group_node_id, namespace_node_id, pod_id,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Builds the cluster-rooted domain tree from a flat object listing.
///
/// Namespaces and cluster-wide kinds come out sorted by name, children keep
/// the order they had in the input. Groups are synthesized even when empty,
/// and a namespace or pod referenced but never listed is synthesized too.
pub struct TreeBuilder<'a> {
    cluster: &'a ClusterRef,
    cluster_wide_kinds: BTreeSet<String>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(cluster: &'a ClusterRef) -> Self {
        Self {
            cluster,
            cluster_wide_kinds: BTreeSet::new(),
        }
    }

    /// Kinds that get a (possibly empty, collapsed) bucket regardless of content.
    pub fn with_cluster_wide_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_wide_kinds
            .extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn build(&self, objects: &[ClusterObject]) -> EntityNode {
        let mut namespaces = BTreeMap::<String, NamespaceSlot>::new();
        let mut buckets = self
            .cluster_wide_kinds
            .iter()
            .map(|kind| (kind.clone(), Vec::<EntityNode>::new()))
            .collect::<BTreeMap<_, _>>();

        for object in objects {
            match (&object.kind, object.namespace.as_deref()) {
                (ObjectKind::Namespace, _) => {
                    let slot = namespace_slot(&mut namespaces, &object.name);
                    slot.node.health = object.health;
                    if let Some(version) = &object.api_version {
                        slot.node.api_versions.insert(version.clone());
                    }
                    slot.declared = true;
                }
                (ObjectKind::Pod, Some(namespace)) => {
                    namespace_slot(&mut namespaces, namespace)
                        .pods
                        .add_pod(object);
                }
                (ObjectKind::Container, Some(namespace)) if object.pod.is_some() => {
                    namespace_slot(&mut namespaces, namespace)
                        .pods
                        .add_container(namespace, object);
                }
                (kind, _) => {
                    let bucket = kind.kind_name().to_string();
                    buckets
                        .entry(bucket.clone())
                        .or_default()
                        .push(cluster_wide_leaf(&bucket, object));
                }
            }
        }

        let mut root = EntityNode::new(
            self.cluster.node_id(),
            self.cluster.name.clone(),
            EntityKind::Cluster,
        );
        root.health = HealthStatus::Healthy;

        for (name, slot) in namespaces {
            if !slot.declared {
                debug!(namespace = %name, "synthesizing namespace referenced by objects");
            }
            let mut node = slot.node;
            node.loaded = !slot.pods.is_empty();
            node.children = slot.pods.into_children();
            root.children.push(node);
        }

        if !buckets.is_empty() {
            let mut hierarchy = cluster_wide_hierarchy();
            for (kind, leaves) in buckets {
                let mut bucket = cluster_wide_bucket(&kind);
                bucket.loaded = !leaves.is_empty();
                bucket.children = leaves;
                hierarchy.children.push(bucket);
            }
            root.children.push(hierarchy);
        }

        aggregate_api_versions(&mut root);
        root
    }
}

pub fn build_tree(cluster: &ClusterRef, objects: &[ClusterObject]) -> EntityNode {
    TreeBuilder::new(cluster).build(objects)
}

/// Top-level tree with every namespace and cluster-wide bucket collapsed.
pub fn build_skeleton(cluster: &ClusterRef, skeleton: &ClusterSkeleton) -> EntityNode {
    TreeBuilder::new(cluster)
        .with_cluster_wide_kinds(skeleton.cluster_wide_kinds.iter().cloned())
        .build(&skeleton.namespaces)
}

/// Returns a new tree with `objects` materialized as the children of the
/// group addressed by `key`, or `None` when that group is not in the tree.
pub fn merge_group(
    tree: &EntityNode,
    key: &LoadingGroupKey,
    objects: &[ClusterObject],
) -> Option<EntityNode> {
    let mut merged = tree.clone();
    let group = merged.find_mut(&key.node_id())?;

    group.children = match key.group_kind {
        GroupKind::Namespace => {
            let mut pods = PodSlots::default();
            for object in objects {
                if object.namespace.as_deref() != Some(key.group_id.as_str()) {
                    debug!(
                        object = %object.id,
                        group = %key,
                        "dropping object outside fetched namespace"
                    );
                    continue;
                }
                match object.kind {
                    ObjectKind::Pod => pods.add_pod(object),
                    ObjectKind::Container if object.pod.is_some() => {
                        pods.add_container(&key.group_id, object)
                    }
                    _ => debug!(object = %object.id, group = %key, "dropping non-pod object"),
                }
            }
            pods.into_children()
        }
        GroupKind::ClusterWideKind => objects
            .iter()
            .map(|object| cluster_wide_leaf(&key.group_id, object))
            .collect(),
    };
    group.loaded = true;

    aggregate_api_versions(&mut merged);
    Some(merged)
}

/// Grows `tree` with namespaces and cluster-wide kinds from a fresh skeleton
/// listing. Nothing is removed and loaded groups stay loaded.
pub fn sync_skeleton(tree: &EntityNode, skeleton: &ClusterSkeleton) -> EntityNode {
    let mut synced = tree.clone();

    for namespace in &skeleton.namespaces {
        let id = namespace_node_id(&namespace.name);
        if let Some(existing) = synced.find_mut(&id) {
            existing.health = namespace.health;
            continue;
        }
        let mut node = namespace_node(&namespace.name);
        node.health = namespace.health;
        node.loaded = false;
        if let Some(version) = &namespace.api_version {
            node.api_versions.insert(version.clone());
        }
        let position = synced
            .children
            .iter()
            .position(|child| {
                child.kind != EntityKind::Namespace || child.name.as_str() > namespace.name.as_str()
            })
            .unwrap_or(synced.children.len());
        synced.children.insert(position, node);
    }

    if !skeleton.cluster_wide_kinds.is_empty() {
        if synced.find(CLUSTER_WIDE_GROUP_ID).is_none() {
            synced.children.push(cluster_wide_hierarchy());
        }
        if let Some(hierarchy) = synced.find_mut(CLUSTER_WIDE_GROUP_ID) {
            for kind in &skeleton.cluster_wide_kinds {
                if hierarchy.find(&cluster_wide_group_node_id(kind)).is_some() {
                    continue;
                }
                let mut bucket = cluster_wide_bucket(kind);
                bucket.loaded = false;
                let position = hierarchy
                    .children
                    .iter()
                    .position(|child| child.name.as_str() > kind.as_str())
                    .unwrap_or(hierarchy.children.len());
                hierarchy.children.insert(position, bucket);
            }
        }
    }

    aggregate_api_versions(&mut synced);
    synced
}

struct NamespaceSlot {
    node: EntityNode,
    pods: PodSlots,
    declared: bool,
}

fn namespace_slot<'m>(
    namespaces: &'m mut BTreeMap<String, NamespaceSlot>,
    name: &str,
) -> &'m mut NamespaceSlot {
    namespaces
        .entry(name.to_string())
        .or_insert_with(|| NamespaceSlot {
            node: namespace_node(name),
            pods: PodSlots::default(),
            declared: false,
        })
}

/// Pods of one namespace in first-seen order, each owning its containers.
#[derive(Default)]
struct PodSlots {
    pods: Vec<EntityNode>,
    index: HashMap<String, usize>,
}

impl PodSlots {
    fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    fn add_pod(&mut self, object: &ClusterObject) {
        let slot = self.slot(&object.id, &object.name);
        let pod = &mut self.pods[slot];
        pod.health = object.health;
        if let Some(version) = &object.api_version {
            pod.api_versions.insert(version.clone());
        }
        pod.connections
            .extend(object.depends_on.iter().map(|target| ConnectionRef {
                source_id: object.id.clone(),
                target_id: target.clone(),
            }));
    }

    fn add_container(&mut self, namespace: &str, object: &ClusterObject) {
        let Some(pod_name) = object.pod.as_deref() else {
            return;
        };
        let owner_id = pod_id(namespace, pod_name);
        if !self.index.contains_key(&owner_id) {
            debug!(
                pod = %owner_id,
                container = %object.id,
                "synthesizing pod referenced by container"
            );
        }
        let slot = self.slot(&owner_id, pod_name);
        let pod = &mut self.pods[slot];
        if pod.children.iter().any(|child| child.id == object.id) {
            debug!(container = %object.id, "skipping duplicate container");
            return;
        }
        pod.connections.push(ConnectionRef {
            source_id: owner_id,
            target_id: object.id.clone(),
        });
        pod.children.push(object_leaf(object, EntityKind::Container));
    }

    fn slot(&mut self, id: &str, name: &str) -> usize {
        if let Some(index) = self.index.get(id) {
            return *index;
        }
        let index = self.pods.len();
        self.pods.push(EntityNode::new(id, name, EntityKind::Pod));
        self.index.insert(id.to_string(), index);
        index
    }

    fn into_children(self) -> Vec<EntityNode> {
        self.pods
    }
}

fn namespace_node(name: &str) -> EntityNode {
    let mut node = EntityNode::new(namespace_node_id(name), name, EntityKind::Namespace);
    node.group_key = Some(LoadingGroupKey::namespace(name));
    node
}

fn cluster_wide_hierarchy() -> EntityNode {
    EntityNode::new(
        CLUSTER_WIDE_GROUP_ID,
        CLUSTER_WIDE_GROUP_LABEL,
        EntityKind::HierarchyGroup,
    )
}

fn cluster_wide_bucket(kind: &str) -> EntityNode {
    let mut node = EntityNode::new(
        cluster_wide_group_node_id(kind),
        kind,
        EntityKind::ClusterWideObjectGroup {
            kind: kind.to_string(),
        },
    );
    node.group_key = Some(LoadingGroupKey::cluster_wide(kind));
    node
}

fn cluster_wide_leaf(bucket: &str, object: &ClusterObject) -> EntityNode {
    object_leaf(
        object,
        EntityKind::ClusterWideObject {
            kind: bucket.to_string(),
        },
    )
}

fn object_leaf(object: &ClusterObject, kind: EntityKind) -> EntityNode {
    let mut node = EntityNode::new(object.id.clone(), object.name.clone(), kind);
    node.health = object.health;
    if let Some(version) = &object.api_version {
        node.api_versions.insert(version.clone());
    }
    node.connections = object
        .depends_on
        .iter()
        .map(|target| ConnectionRef {
            source_id: object.id.clone(),
            target_id: target.clone(),
        })
        .collect();
    node
}

/// Folds descendant api versions into every group. Only ever adds entries.
fn aggregate_api_versions(node: &mut EntityNode) -> BTreeSet<String> {
    for index in 0..node.children.len() {
        let versions = aggregate_api_versions(&mut node.children[index]);
        node.api_versions.extend(versions);
    }
    node.api_versions.clone()
}

#[cfg(test)]
mod tests {
    use super::{build_skeleton, build_tree, merge_group, sync_skeleton};
    use crate::model::{
        ClusterObject, ClusterRef, ClusterSkeleton, EntityKind, EntityNode, HealthStatus,
        LoadingGroupKey, ObjectKind,
    };
    use std::collections::HashMap;

    fn cluster() -> ClusterRef {
        ClusterRef::new("c1", "prod")
    }

    fn assert_tree_invariants(tree: &EntityNode) {
        assert_eq!(tree.kind, EntityKind::Cluster);
        let mut parents = HashMap::<String, Option<String>>::new();
        let mut roots = 0;
        tree.walk(&mut |node, parent| {
            if node.kind == EntityKind::Cluster {
                roots += 1;
            }
            let previous = parents.insert(node.id.clone(), parent.map(str::to_string));
            assert!(previous.is_none(), "node {} has more than one parent", node.id);
        });
        assert_eq!(roots, 1);
        assert_eq!(parents.get(&tree.id), Some(&None));
    }

    fn child_names(node: &EntityNode) -> Vec<&str> {
        node.children.iter().map(|child| child.name.as_str()).collect()
    }

    #[test]
    fn builds_single_rooted_tree_with_sorted_namespaces() {
        let objects = vec![
            ClusterObject::namespace("kube-system"),
            ClusterObject::namespace("default"),
            ClusterObject::pod("default", "web-1"),
            ClusterObject::pod("default", "api-1"),
            ClusterObject::container("default", "web-1", "nginx"),
            ClusterObject::container("default", "web-1", "sidecar"),
            ClusterObject::cluster_wide("Node", "node-b"),
            ClusterObject::cluster_wide("Node", "node-a"),
        ];
        let tree = build_tree(&cluster(), &objects);
        assert_tree_invariants(&tree);

        assert_eq!(child_names(&tree), vec!["default", "kube-system", "cluster-wide"]);
        let default = &tree.children[0];
        assert!(default.loaded);
        assert_eq!(child_names(default), vec!["web-1", "api-1"]);
        assert_eq!(child_names(&default.children[0]), vec!["nginx", "sidecar"]);

        let kube_system = &tree.children[1];
        assert!(kube_system.is_placeholder());

        let nodes = tree.find("cwo/Node").expect("node bucket");
        assert_eq!(child_names(nodes), vec!["node-b", "node-a"]);
    }

    #[test]
    fn pod_owns_connections_to_its_containers() {
        let objects = vec![
            ClusterObject::pod("default", "web-1"),
            ClusterObject::container("default", "web-1", "nginx"),
        ];
        let tree = build_tree(&cluster(), &objects);
        let pod = tree.find("pod/default/web-1").expect("pod");
        assert_eq!(pod.connections.len(), 1);
        assert_eq!(pod.connections[0].target_id, "container/default/web-1/nginx");
    }

    #[test]
    fn missing_namespace_and_pod_are_synthesized() {
        let objects = vec![
            ClusterObject::container("ghost", "orphan", "app"),
            ClusterObject::pod("ghost", "other"),
        ];
        let tree = build_tree(&cluster(), &objects);
        assert_tree_invariants(&tree);

        let ghost = tree.find("ns/ghost").expect("synthesized namespace");
        assert_eq!(ghost.health, HealthStatus::Unknown);
        assert_eq!(child_names(ghost), vec!["orphan", "other"]);
        assert_eq!(child_names(&ghost.children[0]), vec!["app"]);
    }

    #[test]
    fn objects_without_namespace_go_to_cluster_wide_branch() {
        let mut stray = ClusterObject::pod("default", "stray");
        stray.namespace = None;
        let tree = build_tree(&cluster(), &[stray]);
        assert_tree_invariants(&tree);

        let bucket = tree.find("cwo/Pod").expect("pod bucket");
        assert_eq!(
            bucket.children[0].kind,
            EntityKind::ClusterWideObject {
                kind: "Pod".to_string()
            }
        );
        assert!(tree.find("ns/default").is_none());
    }

    #[test]
    fn skeleton_without_cluster_wide_kinds_has_no_hierarchy_group() {
        let skeleton = ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("default")],
            cluster_wide_kinds: Vec::new(),
        };
        let tree = build_skeleton(&cluster(), &skeleton);
        assert_eq!(tree.node_count(), 2);
        assert!(tree.children[0].is_placeholder());
    }

    #[test]
    fn skeleton_buckets_are_empty_collapsed_groups() {
        let skeleton = ClusterSkeleton {
            namespaces: Vec::new(),
            cluster_wide_kinds: vec!["StorageClass".to_string(), "Node".to_string()],
        };
        let tree = build_skeleton(&cluster(), &skeleton);
        let hierarchy = &tree.children[0];
        assert_eq!(hierarchy.kind, EntityKind::HierarchyGroup);
        assert_eq!(child_names(hierarchy), vec!["Node", "StorageClass"]);
        assert!(hierarchy.children.iter().all(EntityNode::is_placeholder));
    }

    #[test]
    fn merge_materializes_group_without_touching_source() {
        let skeleton = ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("default")],
            cluster_wide_kinds: Vec::new(),
        };
        let tree = build_skeleton(&cluster(), &skeleton);
        let fetched = vec![
            ClusterObject::pod("default", "a").with_api_version("v1"),
            ClusterObject::pod("default", "b"),
            ClusterObject::pod("other", "c"),
        ];
        let merged = merge_group(&tree, &LoadingGroupKey::namespace("default"), &fetched)
            .expect("group present");

        assert!(tree.children[0].children.is_empty());
        let default = merged.find("ns/default").expect("namespace");
        assert!(default.loaded);
        assert_eq!(child_names(default), vec!["a", "b"]);
        assert!(merged.api_versions.contains("v1"));
    }

    #[test]
    fn merge_into_unknown_group_is_rejected() {
        let tree = build_tree(&cluster(), &[]);
        assert!(merge_group(&tree, &LoadingGroupKey::namespace("gone"), &[]).is_none());
    }

    #[test]
    fn sync_skeleton_only_grows_the_tree() {
        let skeleton = ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("b")],
            cluster_wide_kinds: Vec::new(),
        };
        let tree = build_skeleton(&cluster(), &skeleton);
        let tree = merge_group(
            &tree,
            &LoadingGroupKey::namespace("b"),
            &[ClusterObject::pod("b", "pod-1")],
        )
        .expect("merged");

        let refreshed = ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("a"), ClusterObject::namespace("c")],
            cluster_wide_kinds: vec!["Node".to_string()],
        };
        let synced = sync_skeleton(&tree, &refreshed);
        assert_tree_invariants(&synced);

        assert_eq!(child_names(&synced), vec!["a", "b", "c", "cluster-wide"]);
        let b = synced.find("ns/b").expect("kept namespace");
        assert!(b.loaded);
        assert_eq!(child_names(b), vec!["pod-1"]);
        assert!(synced.find("ns/a").is_some_and(EntityNode::is_placeholder));
        assert!(synced.find("cwo/Node").is_some_and(EntityNode::is_placeholder));
    }

    #[test]
    fn namespace_objects_keep_their_kind_out_of_buckets() {
        let tree = build_tree(&cluster(), &[ClusterObject::namespace("default")]);
        assert!(tree.find("cwo/Namespace").is_none());
        assert!(matches!(
            ClusterObject::namespace("x").kind,
            ObjectKind::Namespace
        ));
    }
}
