use crate::model::{ConnectionRef, EntityKind, EntityNode, HealthStatus};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const COLUMN_WIDTH: i32 = 4;
pub const ROW_HEIGHT: i32 = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Bounds {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenderNode {
    pub id: String,
    pub group_id: Option<String>,
    pub kind: EntityKind,
    pub label: String,
    pub health: HealthStatus,
    pub placeholder: bool,
    pub hidden: bool,
    pub position: Position,
    pub depth: usize,
}

impl RenderNode {
    pub fn is_group(&self) -> bool {
        self.kind.is_group()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenderEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct CompileOptions {
    /// Containers are still emitted, flagged hidden, so ids stay stable.
    pub hide_containers: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderGraph {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
    pub bounds: Bounds,
    index: HashMap<String, usize>,
}

impl RenderGraph {
    pub fn node(&self, id: &str) -> Option<&RenderNode> {
        self.index.get(id).and_then(|index| self.nodes.get(*index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }

    pub fn edge_ids(&self) -> Vec<&str> {
        self.edges.iter().map(|edge| edge.id.as_str()).collect()
    }

    pub fn visible_nodes(&self) -> impl Iterator<Item = &RenderNode> {
        self.nodes.iter().filter(|node| !node.hidden)
    }

    /// Children of `group_id` in render order.
    pub fn members<'g>(&'g self, group_id: &'g str) -> impl Iterator<Item = &'g RenderNode> {
        self.nodes
            .iter()
            .filter(move |node| node.group_id.as_deref() == Some(group_id))
    }
}

/// Flattens a (filtered) domain tree into render nodes and edges.
///
/// The walk is depth-first in child order, so compiling an unchanged tree
/// always yields the same ids in the same order. Unloaded groups become a
/// single placeholder node. Connections whose endpoints are missing or hidden
/// are dropped.
pub fn compile(tree: &EntityNode, options: &CompileOptions) -> RenderGraph {
    debug_assert_eq!(tree.kind, EntityKind::Cluster, "render graph root must be the cluster");

    let mut compiler = Compiler {
        options,
        graph: RenderGraph::default(),
        connections: Vec::new(),
        next_row: 0,
    };
    compiler.visit(tree, None, 0, false);
    compiler.finish()
}

struct Compiler<'t, 'o> {
    options: &'o CompileOptions,
    graph: RenderGraph,
    connections: Vec<&'t ConnectionRef>,
    next_row: i32,
}

impl<'t> Compiler<'t, '_> {
    fn visit(&mut self, node: &'t EntityNode, group_id: Option<&str>, depth: usize, hidden: bool) {
        if self.graph.index.contains_key(&node.id) {
            debug!(node = %node.id, "skipping duplicate node id");
            return;
        }

        let hidden =
            hidden || (self.options.hide_containers && node.kind == EntityKind::Container);
        let placeholder = node.is_placeholder();
        let x = depth as i32 * COLUMN_WIDTH;
        let y = if hidden {
            (self.next_row - 1).max(0) * ROW_HEIGHT
        } else {
            let row = self.next_row;
            self.next_row += 1;
            row * ROW_HEIGHT
        };

        if !hidden {
            let right = x + node.name.chars().count() as i32 + 2;
            self.graph.bounds.width = self.graph.bounds.width.max(right);
            self.graph.bounds.height = self.graph.bounds.height.max(y + ROW_HEIGHT);
        }

        self.graph
            .index
            .insert(node.id.clone(), self.graph.nodes.len());
        self.graph.nodes.push(RenderNode {
            id: node.id.clone(),
            group_id: group_id.map(str::to_string),
            kind: node.kind.clone(),
            label: node.name.clone(),
            health: node.health,
            placeholder,
            hidden,
            position: Position { x, y },
            depth,
        });
        self.connections.extend(node.connections.iter());

        if placeholder {
            return;
        }
        for child in &node.children {
            self.visit(child, Some(node.id.as_str()), depth + 1, hidden);
        }
    }

    fn finish(mut self) -> RenderGraph {
        let mut seen = HashSet::new();
        for connection in self.connections {
            let resolved = matches!(
                (
                    self.graph.node(&connection.source_id),
                    self.graph.node(&connection.target_id),
                ),
                (Some(source), Some(target)) if !source.hidden && !target.hidden
            );
            if !resolved {
                debug!(
                    source = %connection.source_id,
                    target = %connection.target_id,
                    "dropping edge with unresolved or hidden endpoint"
                );
                continue;
            }
            let id = format!("{}->{}", connection.source_id, connection.target_id);
            if seen.insert(id.clone()) {
                self.graph.edges.push(RenderEdge {
                    id,
                    source: connection.source_id.clone(),
                    target: connection.target_id.clone(),
                });
            }
        }
        self.graph
    }
}
