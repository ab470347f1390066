use crate::model::{EntityKind, EntityNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Facet {
    Namespaces,
    ClusterWideObjectKinds,
    ObjectKinds,
}

impl Facet {
    pub const ALL: [Self; 3] = [
        Self::Namespaces,
        Self::ClusterWideObjectKinds,
        Self::ObjectKinds,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Namespaces => "Namespaces",
            Self::ClusterWideObjectKinds => "Cluster-wide kinds",
            Self::ObjectKinds => "Object kinds",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Namespaces => Self::ClusterWideObjectKinds,
            Self::ClusterWideObjectKinds => Self::ObjectKinds,
            Self::ObjectKinds => Self::Namespaces,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            Self::Namespaces => Self::ObjectKinds,
            Self::ClusterWideObjectKinds => Self::Namespaces,
            Self::ObjectKinds => Self::ClusterWideObjectKinds,
        }
    }
}

/// Three independent allow-lists; `None` means "all".
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub namespaces: Option<BTreeSet<String>>,
    #[serde(default)]
    pub cluster_wide_object_kinds: Option<BTreeSet<String>>,
    #[serde(default)]
    pub object_kinds: Option<BTreeSet<String>>,
}

impl FilterState {
    pub fn facet(&self, facet: Facet) -> Option<&BTreeSet<String>> {
        match facet {
            Facet::Namespaces => self.namespaces.as_ref(),
            Facet::ClusterWideObjectKinds => self.cluster_wide_object_kinds.as_ref(),
            Facet::ObjectKinds => self.object_kinds.as_ref(),
        }
    }

    fn facet_mut(&mut self, facet: Facet) -> &mut Option<BTreeSet<String>> {
        match facet {
            Facet::Namespaces => &mut self.namespaces,
            Facet::ClusterWideObjectKinds => &mut self.cluster_wide_object_kinds,
            Facet::ObjectKinds => &mut self.object_kinds,
        }
    }

    pub fn with_facet<I, S>(mut self, facet: Facet, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.facet_mut(facet) = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn allows(&self, facet: Facet, value: &str) -> bool {
        self.facet(facet)
            .is_none_or(|allowed| allowed.contains(value))
    }

    pub fn is_unfiltered(&self) -> bool {
        Facet::ALL.iter().all(|facet| self.facet(*facet).is_none())
    }
}

/// Returns the pruned copy of `tree` under `filters`.
///
/// Namespaces and cluster-wide buckets failing their facet disappear with
/// their subtree. Objects stay when their kind is allowed or when they are
/// the ancestor of something that stays. Structural groups that end up with
/// no children are kept as empty groups.
pub fn filter_tree(tree: &EntityNode, filters: &FilterState) -> EntityNode {
    debug_assert_eq!(tree.kind, EntityKind::Cluster);
    if filters.is_unfiltered() {
        return tree.clone();
    }
    retain(tree, filters).unwrap_or_else(|| shallow_copy(tree, Vec::new()))
}

fn retain(node: &EntityNode, filters: &FilterState) -> Option<EntityNode> {
    let keep_when_empty = match &node.kind {
        EntityKind::Cluster | EntityKind::HierarchyGroup => true,
        EntityKind::Namespace => {
            if !filters.allows(Facet::Namespaces, &node.name) {
                return None;
            }
            true
        }
        EntityKind::ClusterWideObjectGroup { kind } => {
            if !filters.allows(Facet::ClusterWideObjectKinds, kind) {
                return None;
            }
            true
        }
        EntityKind::Pod | EntityKind::Container | EntityKind::ClusterWideObject { .. } => node
            .kind
            .object_kind()
            .is_some_and(|kind| filters.allows(Facet::ObjectKinds, kind)),
    };

    let children = node
        .children
        .iter()
        .filter_map(|child| retain(child, filters))
        .collect::<Vec<_>>();

    if keep_when_empty || !children.is_empty() {
        Some(shallow_copy(node, children))
    } else {
        None
    }
}

fn shallow_copy(node: &EntityNode, children: Vec<EntityNode>) -> EntityNode {
    EntityNode {
        id: node.id.clone(),
        name: node.name.clone(),
        kind: node.kind.clone(),
        health: node.health,
        api_versions: node.api_versions.clone(),
        children,
        connections: node.connections.clone(),
        group_key: node.group_key.clone(),
        loaded: node.loaded,
    }
}

/// Values a facet can choose from in the current tree.
pub fn facet_values(tree: &EntityNode, facet: Facet) -> BTreeSet<String> {
    let mut values = BTreeSet::new();
    tree.walk(&mut |node, _| match (&node.kind, facet) {
        (EntityKind::Namespace, Facet::Namespaces) => {
            values.insert(node.name.clone());
        }
        (EntityKind::ClusterWideObjectGroup { kind }, Facet::ClusterWideObjectKinds) => {
            values.insert(kind.clone());
        }
        (kind, Facet::ObjectKinds) => {
            if let Some(object_kind) = kind.object_kind() {
                values.insert(object_kind.to_string());
            }
        }
        _ => {}
    });
    values
}

/// Staged (draft) and committed (applied) filter selections.
///
/// Checkbox edits land in the draft; only `apply` moves a facet into the
/// applied state, so the graph is recomputed once per commit.
#[derive(Debug, Clone, Default)]
pub struct FilterPanel {
    applied: FilterState,
    draft: FilterState,
}

impl FilterPanel {
    pub fn new(initial: FilterState) -> Self {
        Self {
            draft: initial.clone(),
            applied: initial,
        }
    }

    pub fn applied(&self) -> &FilterState {
        &self.applied
    }

    pub fn draft(&self) -> &FilterState {
        &self.draft
    }

    pub fn draft_allows(&self, facet: Facet, value: &str) -> bool {
        self.draft.allows(facet, value)
    }

    pub fn is_dirty(&self, facet: Facet) -> bool {
        self.draft.facet(facet) != self.applied.facet(facet)
    }

    /// Flips `value` in the draft of `facet`. Selecting everything in
    /// `available` collapses back to "all".
    pub fn toggle_draft(&mut self, facet: Facet, value: &str, available: &BTreeSet<String>) {
        let slot = self.draft.facet_mut(facet);
        let mut chosen = slot.take().unwrap_or_else(|| available.clone());
        if !chosen.remove(value) {
            chosen.insert(value.to_string());
        }
        *slot = if available.is_subset(&chosen) {
            None
        } else {
            Some(chosen)
        };
    }

    pub fn select_all_draft(&mut self, facet: Facet) {
        *self.draft.facet_mut(facet) = None;
    }

    pub fn select_none_draft(&mut self, facet: Facet) {
        *self.draft.facet_mut(facet) = Some(BTreeSet::new());
    }

    pub fn replace_draft(&mut self, facet: Facet, values: Option<BTreeSet<String>>) {
        *self.draft.facet_mut(facet) = values;
    }

    pub fn discard_draft(&mut self, facet: Facet) {
        *self.draft.facet_mut(facet) = self.applied.facet(facet).cloned();
    }

    /// Commits the draft of one facet. Returns whether the applied state changed.
    pub fn apply(&mut self, facet: Facet) -> bool {
        if !self.is_dirty(facet) {
            return false;
        }
        *self.applied.facet_mut(facet) = self.draft.facet(facet).cloned();
        true
    }

    pub fn apply_all(&mut self) -> bool {
        Facet::ALL
            .into_iter()
            .fold(false, |changed, facet| self.apply(facet) || changed)
    }
}

#[cfg(test)]
mod tests {
    use super::{Facet, FilterPanel, FilterState, facet_values, filter_tree};
    use crate::model::{ClusterObject, ClusterRef, EntityNode};
    use crate::tree::build_tree;
    use std::collections::BTreeSet;

    fn sample_tree() -> EntityNode {
        let objects = vec![
            ClusterObject::namespace("default"),
            ClusterObject::namespace("kube-system"),
            ClusterObject::namespace("empty"),
            ClusterObject::pod("default", "web"),
            ClusterObject::container("default", "web", "nginx"),
            ClusterObject::pod("kube-system", "dns"),
            ClusterObject::container("kube-system", "dns", "coredns"),
            ClusterObject::cluster_wide("Node", "node-a"),
            ClusterObject::cluster_wide("StorageClass", "standard"),
        ];
        build_tree(&ClusterRef::new("c1", "prod"), &objects)
    }

    fn leaf_ids(tree: &EntityNode) -> BTreeSet<String> {
        tree.leaves().into_iter().map(|leaf| leaf.id.clone()).collect()
    }

    #[test]
    fn namespace_facet_removes_other_namespaces_entirely() {
        let tree = sample_tree();
        let filters = FilterState::default().with_facet(Facet::Namespaces, ["default"]);
        let filtered = filter_tree(&tree, &filters);

        assert!(filtered.find("ns/default").is_some());
        assert!(filtered.find("ns/kube-system").is_none());
        assert!(filtered.find("pod/kube-system/dns").is_none());
        assert!(filtered.find("cwo/Node").is_some());
        assert_eq!(filtered.id, tree.id);
    }

    #[test]
    fn object_facet_keeps_ancestors_and_empty_groups() {
        let tree = sample_tree();
        let filters = FilterState::default().with_facet(Facet::ObjectKinds, ["Container"]);
        let filtered = filter_tree(&tree, &filters);

        assert!(filtered.find("pod/default/web").is_some());
        assert!(filtered.find("container/default/web/nginx").is_some());
        let nodes = filtered.find("cwo/Node").expect("bucket kept");
        assert!(nodes.children.is_empty());
        assert!(filtered.find("ns/empty").is_some());
    }

    #[test]
    fn facets_compose_with_and() {
        let tree = sample_tree();
        let filters = FilterState::default()
            .with_facet(Facet::Namespaces, ["kube-system"])
            .with_facet(Facet::ObjectKinds, ["Pod"])
            .with_facet(Facet::ClusterWideObjectKinds, ["Node"]);
        let filtered = filter_tree(&tree, &filters);

        assert_eq!(
            leaf_ids(&filtered),
            BTreeSet::new(),
            "pods are groups, containers are filtered out"
        );
        let dns = filtered.find("pod/kube-system/dns").expect("pod kept");
        assert!(dns.children.is_empty());
        assert!(filtered.find("cwo/StorageClass").is_none());
        assert!(filtered.find("node/node-a").is_none());
    }

    #[test]
    fn filtering_is_idempotent() {
        let tree = sample_tree();
        let filters = FilterState::default()
            .with_facet(Facet::Namespaces, ["default", "empty"])
            .with_facet(Facet::ObjectKinds, ["Container", "Node"]);
        let once = filter_tree(&tree, &filters);
        let twice = filter_tree(&once, &filters);
        assert_eq!(once, twice);
    }

    #[test]
    fn narrowing_a_facet_never_adds_leaves() {
        let tree = sample_tree();
        let wide = FilterState::default().with_facet(
            Facet::ObjectKinds,
            ["Container", "Node", "StorageClass"],
        );
        let narrow = FilterState::default().with_facet(Facet::ObjectKinds, ["Container"]);
        let wide_leaves = leaf_ids(&filter_tree(&tree, &wide));
        let narrow_leaves = leaf_ids(&filter_tree(&tree, &narrow));
        assert!(narrow_leaves.is_subset(&wide_leaves));
        assert!(narrow_leaves.len() < wide_leaves.len());

        let all_leaves = leaf_ids(&filter_tree(&tree, &FilterState::default()));
        assert!(wide_leaves.is_subset(&all_leaves));
    }

    #[test]
    fn narrowing_the_namespace_facet_never_adds_leaves() {
        let tree = sample_tree();
        let wide = FilterState::default().with_facet(Facet::Namespaces, ["default", "kube-system"]);
        let narrow = FilterState::default().with_facet(Facet::Namespaces, ["default"]);
        let wide_leaves = leaf_ids(&filter_tree(&tree, &wide));
        let narrow_leaves = leaf_ids(&filter_tree(&tree, &narrow));
        assert!(narrow_leaves.is_subset(&wide_leaves));
        assert!(wide_leaves.contains("container/kube-system/dns/coredns"));
        assert!(!narrow_leaves.contains("container/kube-system/dns/coredns"));
    }

    #[test]
    fn narrowing_the_cluster_wide_facet_never_adds_leaves() {
        let tree = sample_tree();
        let wide = FilterState::default()
            .with_facet(Facet::ClusterWideObjectKinds, ["Node", "StorageClass"]);
        let narrow = FilterState::default().with_facet(Facet::ClusterWideObjectKinds, ["Node"]);
        let wide_leaves = leaf_ids(&filter_tree(&tree, &wide));
        let narrow_leaves = leaf_ids(&filter_tree(&tree, &narrow));
        assert!(narrow_leaves.is_subset(&wide_leaves));
        assert!(wide_leaves.contains("storageclass/standard"));
        assert!(!narrow_leaves.contains("storageclass/standard"));
        assert!(narrow_leaves.contains("node/node-a"));
    }

    #[test]
    fn filtering_leaves_source_tree_untouched() {
        let tree = sample_tree();
        let before = tree.clone();
        let _ = filter_tree(
            &tree,
            &FilterState::default().with_facet(Facet::Namespaces, Vec::<String>::new()),
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn facet_values_reflect_tree_contents() {
        let tree = sample_tree();
        assert_eq!(
            facet_values(&tree, Facet::Namespaces),
            BTreeSet::from(["default".to_string(), "empty".to_string(), "kube-system".to_string()])
        );
        assert_eq!(
            facet_values(&tree, Facet::ObjectKinds),
            BTreeSet::from([
                "Container".to_string(),
                "Node".to_string(),
                "Pod".to_string(),
                "StorageClass".to_string()
            ])
        );
    }

    #[test]
    fn draft_changes_only_land_on_apply() {
        let available = BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()]);
        let mut panel = FilterPanel::new(FilterState::default());

        panel.toggle_draft(Facet::Namespaces, "b", &available);
        panel.toggle_draft(Facet::Namespaces, "c", &available);
        assert!(panel.applied().is_unfiltered());
        assert!(panel.is_dirty(Facet::Namespaces));
        assert!(!panel.draft_allows(Facet::Namespaces, "b"));

        assert!(panel.apply(Facet::Namespaces));
        assert_eq!(
            panel.applied().namespaces,
            Some(BTreeSet::from(["a".to_string()]))
        );
        assert!(!panel.apply(Facet::Namespaces));
    }

    #[test]
    fn reselecting_everything_collapses_to_all() {
        let available = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let mut panel = FilterPanel::new(FilterState::default());
        panel.toggle_draft(Facet::ObjectKinds, "a", &available);
        panel.toggle_draft(Facet::ObjectKinds, "a", &available);
        assert_eq!(panel.draft().object_kinds, None);
    }

    #[test]
    fn discarding_draft_restores_applied_facet() {
        let initial = FilterState::default().with_facet(Facet::Namespaces, ["default"]);
        let mut panel = FilterPanel::new(initial.clone());
        panel.select_all_draft(Facet::Namespaces);
        assert!(panel.is_dirty(Facet::Namespaces));
        panel.discard_draft(Facet::Namespaces);
        assert_eq!(panel.draft(), &initial);
        assert!(!panel.apply_all());
    }
}
