use crate::config::ViewState;
use crate::expansion::{
    ExpansionController, FetchResult, ObjectFetcher, PendingExpansion, Request, Resolution,
};
use crate::filter::{Facet, FilterPanel, FilterState, facet_values, filter_tree};
use crate::graph::{CompileOptions, RenderGraph, RenderNode, compile};
use crate::input::Action;
use crate::model::{ClusterRef, ClusterSkeleton, EntityKind, EntityNode, LoadingGroupKey};
use crate::notify::{Notification, NotificationSink, Toasts};
use crate::search::SearchNavigator;
use crate::selection::{SelectionChange, SelectionStore, SelectionSummary};
use crate::viewport::{Viewport, ZoomLevel};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Search,
    Filter,
    Command,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FocusPane {
    Graph,
    List,
}

#[derive(Debug)]
pub enum AppCommand {
    None,
    RefreshSkeleton,
    AwaitExpansion(PendingExpansion),
    PersistViewState,
    SwitchContext { context: String },
}

impl AppCommand {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppSettings {
    pub max_selection: usize,
    pub hide_containers: bool,
    pub zoom: ZoomLevel,
}

/// Filter panel overlay: which facet is shown and the highlighted value.
#[derive(Debug, Clone)]
struct FilterCursor {
    facet: Facet,
    index: usize,
}

pub struct App {
    running: bool,
    mode: InputMode,
    focus: FocusPane,
    show_help: bool,
    context_open: bool,
    status: String,
    input: String,
    context: String,
    controller: ExpansionController,
    filters: FilterPanel,
    filter_cursor: FilterCursor,
    compile_options: CompileOptions,
    graph: RenderGraph,
    pipeline_revision: u64,
    graph_cursor: Option<String>,
    list_cursor: Option<String>,
    search: SearchNavigator,
    selection: SelectionStore,
    selection_rx: watch::Receiver<SelectionSummary>,
    last_selection: SelectionSummary,
    viewport: Viewport,
    toasts: Arc<Toasts>,
}

impl App {
    pub fn new(
        controller: ExpansionController,
        context: String,
        settings: AppSettings,
        filters: FilterState,
        toasts: Arc<Toasts>,
    ) -> Self {
        let selection = SelectionStore::new(settings.max_selection);
        let selection_rx = selection.subscribe();
        let mut app = Self {
            running: true,
            mode: InputMode::Normal,
            focus: FocusPane::Graph,
            show_help: false,
            context_open: false,
            status: "Ready".to_string(),
            input: String::new(),
            context,
            controller,
            filters: FilterPanel::new(filters),
            filter_cursor: FilterCursor {
                facet: Facet::Namespaces,
                index: 0,
            },
            compile_options: CompileOptions {
                hide_containers: settings.hide_containers,
            },
            graph: RenderGraph::default(),
            pipeline_revision: 0,
            graph_cursor: None,
            list_cursor: None,
            search: SearchNavigator::default(),
            selection,
            selection_rx,
            last_selection: SelectionSummary::default(),
            viewport: Viewport::new(settings.zoom),
            toasts,
        };
        app.recompute();
        app
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn context_panel_open(&self) -> bool {
        self.context_open
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster(&self) -> &ClusterRef {
        self.controller.cluster()
    }

    pub fn tree(&self) -> Arc<EntityNode> {
        self.controller.tree()
    }

    pub fn tree_revision(&self) -> u64 {
        self.controller.revision()
    }

    pub fn pipeline_revision(&self) -> u64 {
        self.pipeline_revision
    }

    pub fn loading_count(&self) -> usize {
        self.controller.loading_keys().count()
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn search(&self) -> &SearchNavigator {
        &self.search
    }

    pub fn selection(&self) -> &SelectionStore {
        &self.selection
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn toasts(&self) -> &Toasts {
        &self.toasts
    }

    pub fn filters(&self) -> &FilterPanel {
        &self.filters
    }

    pub fn hide_containers(&self) -> bool {
        self.compile_options.hide_containers
    }

    pub fn view_state(&self) -> ViewState {
        ViewState {
            filters: self.filters.applied().clone(),
            zoom: self.viewport.zoom(),
        }
    }

    /// The node keyboard actions apply to: the active search match while
    /// searching, otherwise the cursor of the focused pane.
    pub fn focused_node(&self) -> Option<&RenderNode> {
        if let Some(id) = self.search.active() {
            return self.graph.node(id);
        }
        let cursor = match self.focus {
            FocusPane::Graph => self.graph_cursor.as_deref(),
            FocusPane::List => self.list_cursor.as_deref(),
        };
        cursor.and_then(|id| self.graph.node(id))
    }

    pub fn graph_cursor(&self) -> Option<&str> {
        self.graph_cursor.as_deref()
    }

    pub fn list_cursor(&self) -> Option<&str> {
        self.list_cursor.as_deref()
    }

    /// Rows of the list pane: every visible object in render order.
    pub fn list_nodes(&self) -> Vec<&RenderNode> {
        self.graph
            .visible_nodes()
            .filter(|node| node.kind.object_kind().is_some())
            .collect()
    }

    pub fn filter_facet(&self) -> Facet {
        self.filter_cursor.facet
    }

    pub fn filter_cursor_index(&self) -> usize {
        self.filter_cursor.index
    }

    /// Values offered for the current facet, taken from the unfiltered tree.
    pub fn filter_values(&self) -> BTreeSet<String> {
        let mut values = facet_values(&self.controller.tree(), self.filter_cursor.facet);
        if let Some(applied) = self.filters.applied().facet(self.filter_cursor.facet) {
            values.extend(applied.iter().cloned());
        }
        values
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn resize_graph_pane(&mut self, width: u16, height: u16) {
        self.viewport.resize(width, height);
    }

    pub fn on_tick(&mut self, now: Instant) {
        self.toasts.prune(now);
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.show_help && !matches!(action, Action::ToggleHelp | Action::Quit) {
            self.show_help = false;
            return AppCommand::None;
        }

        match self.mode {
            InputMode::Normal => self.apply_normal_action(action),
            InputMode::Search => self.apply_search_action(action),
            InputMode::Filter => self.apply_filter_action(action),
            InputMode::Command => self.apply_command_action(action),
        }
    }

    fn apply_normal_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::Down => {
                self.move_cursor(1);
                AppCommand::None
            }
            Action::Up => {
                self.move_cursor(-1);
                AppCommand::None
            }
            Action::Top => {
                self.move_cursor(isize::MIN);
                AppCommand::None
            }
            Action::Bottom => {
                self.move_cursor(isize::MAX);
                AppCommand::None
            }
            Action::Pan(dx, dy) => {
                self.viewport.pan(dx, dy);
                AppCommand::None
            }
            Action::ToggleFocus => {
                self.focus = match self.focus {
                    FocusPane::Graph => FocusPane::List,
                    FocusPane::List => FocusPane::Graph,
                };
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::ToggleSelection => {
                if let Some(node) = self.focused_node().cloned() {
                    self.toggle_selection(&node);
                }
                AppCommand::None
            }
            Action::ClearSelection => {
                self.selection.clear();
                self.sync_selection_summary();
                self.status = "Selection cleared".to_string();
                AppCommand::None
            }
            Action::ToggleContextPanel => {
                if self.selection.is_empty() {
                    self.context_open = false;
                    self.status = "Nothing selected".to_string();
                } else {
                    self.context_open = !self.context_open;
                }
                AppCommand::None
            }
            Action::ZoomIntoFocused => self.zoom_into_focused(),
            Action::ZoomIn => {
                self.viewport.zoom_in();
                AppCommand::PersistViewState
            }
            Action::ZoomOut => {
                self.viewport.zoom_out();
                AppCommand::PersistViewState
            }
            Action::ZoomPreset(scale) => {
                self.viewport.set_zoom(ZoomLevel::Fixed(scale));
                self.status = format!("Zoom {}", self.viewport.zoom());
                AppCommand::PersistViewState
            }
            Action::ZoomFit => {
                self.viewport.set_zoom(ZoomLevel::FitToScreen);
                self.status = "Zoom to fit".to_string();
                AppCommand::PersistViewState
            }
            Action::ToggleContainers => {
                self.compile_options.hide_containers = !self.compile_options.hide_containers;
                self.recompute();
                self.status = if self.compile_options.hide_containers {
                    "Containers hidden".to_string()
                } else {
                    "Containers shown".to_string()
                };
                AppCommand::None
            }
            Action::Refresh => {
                self.status = "Refreshing cluster listing".to_string();
                AppCommand::RefreshSkeleton
            }
            Action::StartSearch => {
                self.mode = InputMode::Search;
                self.search.open();
                self.search.refresh(&self.graph);
                AppCommand::None
            }
            Action::NextMatch | Action::PrevMatch => {
                if self.search.query().is_empty() {
                    self.status = "No search query; press / to search".to_string();
                    return AppCommand::None;
                }
                self.mode = InputMode::Search;
                self.search.open();
                self.search.refresh(&self.graph);
                self.step_search(action == Action::NextMatch);
                AppCommand::None
            }
            Action::OpenFilterPanel => {
                self.mode = InputMode::Filter;
                self.filter_cursor.index = 0;
                AppCommand::None
            }
            Action::StartCommand => {
                self.mode = InputMode::Command;
                self.input.clear();
                AppCommand::None
            }
            Action::CancelInput => {
                if self.context_open {
                    self.context_open = false;
                }
                AppCommand::None
            }
            Action::NextFacet
            | Action::PrevFacet
            | Action::SelectAllValues
            | Action::SelectNoValues
            | Action::ApplyAllFacets
            | Action::SubmitInput
            | Action::Backspace
            | Action::InputChar(_) => AppCommand::None,
        }
    }

    fn apply_search_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                AppCommand::None
            }
            Action::InputChar(ch) => {
                self.search.push_char(ch, &self.graph);
                AppCommand::None
            }
            Action::Backspace => {
                self.search.pop_char(&self.graph);
                AppCommand::None
            }
            Action::NextMatch | Action::Down => {
                self.step_search(true);
                AppCommand::None
            }
            Action::PrevMatch | Action::Up => {
                self.step_search(false);
                AppCommand::None
            }
            Action::SubmitInput => {
                self.mode = InputMode::Normal;
                let Some(id) = self.search.commit() else {
                    self.status = "No match".to_string();
                    return AppCommand::None;
                };
                let Some(node) = self.graph.node(&id).cloned() else {
                    return AppCommand::None;
                };
                self.viewport.center_on(node.position);
                self.graph_cursor = Some(node.id.clone());
                if node.kind.object_kind().is_some() {
                    self.list_cursor = Some(node.id.clone());
                }
                self.select_node(&node);
                AppCommand::None
            }
            Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.search.close();
                self.status = "Search closed".to_string();
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn apply_filter_action(&mut self, action: Action) -> AppCommand {
        let facet = self.filter_cursor.facet;
        match action {
            Action::Quit => {
                self.running = false;
                AppCommand::None
            }
            Action::Down => {
                let len = self.filter_values().len();
                if len > 0 {
                    self.filter_cursor.index = (self.filter_cursor.index + 1).min(len - 1);
                }
                AppCommand::None
            }
            Action::Up => {
                self.filter_cursor.index = self.filter_cursor.index.saturating_sub(1);
                AppCommand::None
            }
            Action::NextFacet => {
                self.filter_cursor = FilterCursor {
                    facet: facet.next(),
                    index: 0,
                };
                AppCommand::None
            }
            Action::PrevFacet => {
                self.filter_cursor = FilterCursor {
                    facet: facet.previous(),
                    index: 0,
                };
                AppCommand::None
            }
            Action::ToggleSelection => {
                let available = self.filter_values();
                if let Some(value) = available.iter().nth(self.filter_cursor.index).cloned() {
                    self.filters.toggle_draft(facet, &value, &available);
                }
                AppCommand::None
            }
            Action::SelectAllValues => {
                self.filters.select_all_draft(facet);
                AppCommand::None
            }
            Action::SelectNoValues => {
                self.filters.select_none_draft(facet);
                AppCommand::None
            }
            Action::SubmitInput => {
                let changed = self.filters.apply(facet);
                self.after_filter_apply(changed, facet.title())
            }
            Action::ApplyAllFacets => {
                let changed = self.filters.apply_all();
                self.after_filter_apply(changed, "all facets")
            }
            Action::CancelInput => {
                for facet in Facet::ALL {
                    self.filters.discard_draft(facet);
                }
                self.mode = InputMode::Normal;
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn apply_command_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::Quit => {
                self.running = false;
                AppCommand::None
            }
            Action::InputChar(ch) => {
                self.input.push(ch);
                AppCommand::None
            }
            Action::Backspace => {
                self.input.pop();
                AppCommand::None
            }
            Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.input.clear();
                self.status = "Input cancelled".to_string();
                AppCommand::None
            }
            Action::SubmitInput => {
                let line = self.input.trim().to_string();
                self.mode = InputMode::Normal;
                self.input.clear();
                self.execute_command_line(&line)
            }
            _ => AppCommand::None,
        }
    }

    fn execute_command_line(&mut self, line: &str) -> AppCommand {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            self.status = "No command entered".to_string();
            return AppCommand::None;
        };
        let args = parts.collect::<Vec<_>>();

        match command {
            "q" | "quit" => {
                self.running = false;
                AppCommand::None
            }
            "ctx" | "context" => match args.first() {
                Some(context) => AppCommand::SwitchContext {
                    context: (*context).to_string(),
                },
                None => {
                    self.status = format!("Current context: {}", self.context);
                    AppCommand::None
                }
            },
            "ns" | "namespace" | "namespaces" => {
                let values = args
                    .iter()
                    .flat_map(|arg| arg.split(','))
                    .map(str::trim)
                    .filter(|value| !value.is_empty() && *value != "*")
                    .map(str::to_string)
                    .collect::<BTreeSet<_>>();
                let values = (!values.is_empty()).then_some(values);
                self.filters.replace_draft(Facet::Namespaces, values);
                let changed = self.filters.apply(Facet::Namespaces);
                self.after_filter_apply(changed, Facet::Namespaces.title())
            }
            "expand" => {
                let Some(target) = args.first() else {
                    self.status = "Usage: expand <namespace|Kind>".to_string();
                    return AppCommand::None;
                };
                let key = if self
                    .controller
                    .state(&LoadingGroupKey::namespace(*target))
                    .is_some()
                {
                    LoadingGroupKey::namespace(*target)
                } else {
                    LoadingGroupKey::cluster_wide(*target)
                };
                self.request_expansion(key)
            }
            other => {
                let message = format!("Unknown command: {other}");
                self.toasts.notify(Notification::error(message.clone()));
                self.status = message;
                AppCommand::None
            }
        }
    }

    fn after_filter_apply(&mut self, changed: bool, scope: &str) -> AppCommand {
        if !changed {
            self.status = format!("{scope}: nothing to apply");
            return AppCommand::None;
        }
        self.recompute();
        self.status = format!("Applied {scope} filter");
        AppCommand::PersistViewState
    }

    fn zoom_into_focused(&mut self) -> AppCommand {
        let Some(node) = self.focused_node().cloned() else {
            return AppCommand::None;
        };
        self.viewport.center_on(node.position);
        let key = self
            .controller
            .tree()
            .find(&node.id)
            .and_then(|entity| entity.group_key.clone());
        match key {
            Some(key) => self.request_expansion(key),
            None => {
                if node.is_group() {
                    self.viewport.zoom_in();
                }
                AppCommand::None
            }
        }
    }

    fn request_expansion(&mut self, key: LoadingGroupKey) -> AppCommand {
        match self.controller.request(key.clone()) {
            Request::Started(pending) => {
                self.status = format!("Loading {key}");
                AppCommand::AwaitExpansion(pending)
            }
            Request::Coalesced(_) => {
                self.status = format!("Already loading {key}");
                AppCommand::None
            }
            Request::AlreadyLoaded => {
                self.viewport.zoom_in();
                AppCommand::None
            }
            Request::UnknownGroup => {
                self.status = format!("Nothing to expand for {key}");
                AppCommand::None
            }
        }
    }

    /// Feeds a finished fetch back into the tree.
    pub fn on_expansion_resolved(&mut self, pending: &PendingExpansion, result: FetchResult) {
        match self.controller.resolve(pending, result) {
            Resolution::Merged { added } => {
                self.recompute();
                self.status = format!("Loaded {} ({added} objects)", pending.key);
            }
            Resolution::Reverted(error) => {
                self.recompute();
                self.status = error.to_string();
            }
            Resolution::Discarded => {
                debug!(group = %pending.key, "stale expansion result ignored");
            }
        }
    }

    pub fn on_skeleton(&mut self, skeleton: &ClusterSkeleton) {
        let revision = self.controller.revision();
        self.controller.sync_skeleton(skeleton);
        if self.controller.revision() != revision {
            self.recompute();
        }
    }

    /// Switches to another cluster, starting from its persisted view state.
    pub fn switch_cluster(
        &mut self,
        context: String,
        cluster: ClusterRef,
        skeleton: &ClusterSkeleton,
        fetcher: Arc<dyn ObjectFetcher>,
        view_state: ViewState,
    ) {
        self.controller.set_fetcher(fetcher);
        self.controller.reset(cluster, skeleton);
        self.context = context;
        self.filters = FilterPanel::new(view_state.filters);
        self.viewport.set_zoom(view_state.zoom);
        self.selection.clear();
        self.sync_selection_summary();
        self.search.close();
        self.graph_cursor = None;
        self.list_cursor = None;
        self.recompute();
        self.toasts
            .notify(Notification::success(format!("Switched to {}", self.context)));
    }

    /// Filter, compile, then bring search and viewport up to date.
    fn recompute(&mut self) {
        let tree = self.controller.tree();
        let filtered = filter_tree(&tree, self.filters.applied());
        self.graph = compile(&filtered, &self.compile_options);
        self.search.refresh(&self.graph);
        self.viewport.on_graph_changed(self.graph.bounds);
        self.pipeline_revision += 1;

        let graph_ids = self
            .graph
            .visible_nodes()
            .map(|node| node.id.clone())
            .collect::<Vec<_>>();
        self.graph_cursor = keep_cursor(self.graph_cursor.take(), &graph_ids);
        let list_ids = self
            .list_nodes()
            .into_iter()
            .map(|node| node.id.clone())
            .collect::<Vec<_>>();
        self.list_cursor = keep_cursor(self.list_cursor.take(), &list_ids);
    }

    fn move_cursor(&mut self, delta: isize) {
        let ids = match self.focus {
            FocusPane::Graph => self
                .graph
                .visible_nodes()
                .map(|node| node.id.clone())
                .collect::<Vec<_>>(),
            FocusPane::List => self
                .list_nodes()
                .into_iter()
                .map(|node| node.id.clone())
                .collect::<Vec<_>>(),
        };
        if ids.is_empty() {
            return;
        }
        let cursor = match self.focus {
            FocusPane::Graph => &mut self.graph_cursor,
            FocusPane::List => &mut self.list_cursor,
        };
        let current = cursor
            .as_deref()
            .and_then(|id| ids.iter().position(|candidate| candidate == id))
            .unwrap_or(0) as isize;
        let next = current.saturating_add(delta).clamp(0, ids.len() as isize - 1) as usize;
        *cursor = Some(ids[next].clone());
    }

    fn step_search(&mut self, forward: bool) {
        let active = if forward {
            self.search.next()
        } else {
            self.search.previous()
        };
        let Some(position) = active
            .and_then(|id| self.graph.node(id))
            .map(|node| node.position)
        else {
            self.status = format!("No match for '{}'", self.search.query());
            return;
        };
        self.viewport.center_on(position);
        self.status = format!(
            "Match {}/{}",
            self.search.active_index() + 1,
            self.search.matches().len()
        );
    }

    /// Adds a node without ever deselecting it.
    fn select_node(&mut self, node: &RenderNode) {
        if self.selection.contains(&node.id) {
            self.status = format!("{} already selected", node.label);
            return;
        }
        self.toggle_selection(node);
    }

    fn toggle_selection(&mut self, node: &RenderNode) {
        if node.placeholder
            || matches!(node.kind, EntityKind::Cluster | EntityKind::HierarchyGroup)
        {
            self.status = format!("{} cannot be selected", node.label);
            return;
        }
        match self.selection.toggle(&node.id, node.kind.clone()) {
            Ok(SelectionChange::Selected) => {
                self.status = format!("Selected {}", node.label);
            }
            Ok(SelectionChange::Deselected) => {
                self.status = format!("Deselected {}", node.label);
            }
            Err(error) => {
                self.toasts.notify(Notification::error(error.to_string()));
                self.status = error.to_string();
            }
        }
        self.sync_selection_summary();
    }

    /// Opens the context panel on the first selection and closes it once the
    /// selection empties.
    fn sync_selection_summary(&mut self) {
        if !self.selection_rx.has_changed().unwrap_or(false) {
            return;
        }
        let summary = *self.selection_rx.borrow_and_update();
        match (self.last_selection.is_empty(), summary.is_empty()) {
            (true, false) => self.context_open = true,
            (false, true) => self.context_open = false,
            _ => {}
        }
        self.last_selection = summary;
    }
}

fn keep_cursor(cursor: Option<String>, ids: &[String]) -> Option<String> {
    cursor
        .filter(|id| ids.contains(id))
        .or_else(|| ids.first().cloned())
}
