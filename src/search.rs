use crate::graph::{RenderGraph, RenderNode};
use crate::model::EntityKind;

/// Keyboard search over the compiled graph.
///
/// Matches are node ids in render order. The active match is the one that
/// gets focus; it survives recompiles while it still matches and falls back
/// to the first match otherwise.
#[derive(Debug, Clone, Default)]
pub struct SearchNavigator {
    open: bool,
    query: String,
    matches: Vec<String>,
    active: usize,
}

impl SearchNavigator {
    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[String] {
        &self.matches
    }

    /// Position of the active match, 0-based.
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Option<&str> {
        if !self.open {
            return None;
        }
        self.matches.get(self.active).map(String::as_str)
    }

    pub fn set_query(&mut self, query: impl Into<String>, graph: &RenderGraph) {
        self.query = query.into();
        self.refresh(graph);
    }

    pub fn push_char(&mut self, ch: char, graph: &RenderGraph) {
        self.query.push(ch);
        self.refresh(graph);
    }

    pub fn pop_char(&mut self, graph: &RenderGraph) {
        self.query.pop();
        self.refresh(graph);
    }

    /// Re-runs the query against a freshly compiled graph.
    pub fn refresh(&mut self, graph: &RenderGraph) {
        let previous = self.matches.get(self.active).cloned();
        self.matches = find_matches(graph, &self.query);
        self.active = previous
            .and_then(|id| self.matches.iter().position(|candidate| *candidate == id))
            .unwrap_or(0);
    }

    pub fn next(&mut self) -> Option<&str> {
        if self.matches.is_empty() {
            return None;
        }
        self.active = (self.active + 1) % self.matches.len();
        self.active()
    }

    pub fn previous(&mut self) -> Option<&str> {
        if self.matches.is_empty() {
            return None;
        }
        self.active = (self.active + self.matches.len() - 1) % self.matches.len();
        self.active()
    }

    /// Hands back the active match and leaves search mode. The query is kept
    /// so reopening search resumes from it.
    pub fn commit(&mut self) -> Option<String> {
        let committed = self.active().map(str::to_string);
        self.active = 0;
        self.open = false;
        committed
    }

    pub fn close(&mut self) {
        self.open = false;
        self.query.clear();
        self.matches.clear();
        self.active = 0;
    }
}

fn find_matches(graph: &RenderGraph, query: &str) -> Vec<String> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    graph
        .nodes
        .iter()
        .filter(|node| is_searchable(node) && node.label.to_lowercase().contains(&needle))
        .map(|node| node.id.clone())
        .collect()
}

fn is_searchable(node: &RenderNode) -> bool {
    !node.placeholder && !node.hidden && node.kind != EntityKind::HierarchyGroup
}

#[cfg(test)]
mod tests {
    use super::SearchNavigator;
    use crate::graph::{CompileOptions, RenderGraph, compile};
    use crate::model::{ClusterObject, ClusterRef, ClusterSkeleton};
    use crate::tree::{build_skeleton, build_tree};

    fn graph(objects: &[ClusterObject]) -> RenderGraph {
        compile(
            &build_tree(&ClusterRef::new("c1", "prod"), objects),
            &CompileOptions::default(),
        )
    }

    fn web_graph() -> RenderGraph {
        graph(&[
            ClusterObject::pod("default", "web-1"),
            ClusterObject::pod("default", "api"),
            ClusterObject::pod("default", "Web-2"),
            ClusterObject::cluster_wide("Node", "web-node"),
        ])
    }

    #[test]
    fn matches_are_case_insensitive_in_render_order() {
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("WEB", &web_graph());
        assert_eq!(
            search.matches(),
            ["pod/default/web-1", "pod/default/Web-2", "node/web-node"]
        );
        assert_eq!(search.active(), Some("pod/default/web-1"));
    }

    #[test]
    fn next_and_previous_wrap_around() {
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("web", &web_graph());

        assert_eq!(search.previous(), Some("node/web-node"));
        assert_eq!(search.next(), Some("pod/default/web-1"));
        for _ in 0..search.matches().len() {
            search.next();
        }
        assert_eq!(search.active_index(), 0);
    }

    #[test]
    fn placeholders_and_hierarchy_groups_never_match() {
        let skeleton = ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("cluster-apps")],
            cluster_wide_kinds: vec!["Node".to_string()],
        };
        let graph = compile(
            &build_skeleton(&ClusterRef::new("c1", "prod"), &skeleton),
            &CompileOptions::default(),
        );
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("cluster", &graph);
        assert!(search.matches().is_empty());
        assert_eq!(search.next(), None);
    }

    #[test]
    fn hidden_containers_are_not_searchable() {
        let tree = build_tree(
            &ClusterRef::new("c1", "prod"),
            &[
                ClusterObject::pod("default", "web"),
                ClusterObject::container("default", "web", "web-sidecar"),
            ],
        );
        let hidden = compile(
            &tree,
            &CompileOptions {
                hide_containers: true,
            },
        );
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("web", &hidden);
        assert_eq!(search.matches(), ["pod/default/web"]);

        search.refresh(&compile(&tree, &CompileOptions::default()));
        assert_eq!(
            search.matches(),
            ["pod/default/web", "container/default/web/web-sidecar"]
        );
    }

    #[test]
    fn active_match_resets_when_it_disappears() {
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("web", &web_graph());
        search.next();
        assert_eq!(search.active(), Some("pod/default/Web-2"));

        search.push_char('-', &web_graph());
        assert_eq!(search.active(), Some("pod/default/Web-2"));

        search.push_char('1', &web_graph());
        assert_eq!(search.active(), Some("pod/default/web-1"));
        assert_eq!(search.active_index(), 0);
    }

    #[test]
    fn commit_returns_focus_and_resets() {
        let mut search = SearchNavigator::default();
        search.open();
        search.set_query("api", &web_graph());

        assert_eq!(search.commit().as_deref(), Some("pod/default/api"));
        assert!(!search.is_open());
        assert_eq!(search.active_index(), 0);
        assert_eq!(search.active(), None);

        search.open();
        search.close();
        assert!(search.query().is_empty());
        assert!(search.matches().is_empty());
    }
}
