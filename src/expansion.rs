use crate::model::{ClusterObject, ClusterRef, ClusterSkeleton, EntityNode, LoadingGroupKey};
use crate::notify::{Notification, NotificationSink};
use crate::tree::{build_skeleton, merge_group, sync_skeleton};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type FetchResult = Result<Arc<Vec<ClusterObject>>, Arc<anyhow::Error>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Source of the objects that belong to one lazily loadable group.
pub trait ObjectFetcher: Send + Sync {
    fn fetch_objects_for_group(
        &self,
        cluster_id: &str,
        key: &LoadingGroupKey,
    ) -> BoxFuture<'static, anyhow::Result<Vec<ClusterObject>>>;
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ExpansionError {
    #[error("failed to load {key}: {message}")]
    FetchFailed {
        key: LoadingGroupKey,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LoadState {
    Collapsed,
    Loading,
    Loaded,
}

/// Ticket for one in-flight group fetch. Every requester of the same key
/// receives a clone sharing a single underlying fetch.
#[derive(Clone)]
pub struct PendingExpansion {
    pub key: LoadingGroupKey,
    epoch: u64,
    ticket: u64,
    handle: SharedFetch,
}

impl PendingExpansion {
    pub fn wait(&self) -> SharedFetch {
        self.handle.clone()
    }
}

impl std::fmt::Debug for PendingExpansion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingExpansion")
            .field("key", &self.key)
            .field("epoch", &self.epoch)
            .field("ticket", &self.ticket)
            .finish()
    }
}

#[derive(Debug)]
pub enum Request {
    AlreadyLoaded,
    Started(PendingExpansion),
    Coalesced(PendingExpansion),
    UnknownGroup,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Resolution {
    Merged { added: usize },
    Reverted(ExpansionError),
    Discarded,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Expanded {
    AlreadyLoaded,
    UnknownGroup,
    Resolved(Resolution),
}

/// Owns the domain tree and drives `Collapsed -> Loading -> Loaded` per group.
///
/// A group never leaves `Loaded`; a failed fetch returns it to `Collapsed`.
/// Only one fetch per key is in flight; further requests share its handle.
/// The tree is replaced (never mutated in place) on every merge, so an
/// `Arc` snapshot handed out by [`ExpansionController::tree`] stays valid.
pub struct ExpansionController {
    cluster: ClusterRef,
    fetcher: Arc<dyn ObjectFetcher>,
    sink: Arc<dyn NotificationSink>,
    tree: Arc<EntityNode>,
    loading: HashMap<LoadingGroupKey, PendingExpansion>,
    epoch: u64,
    next_ticket: u64,
    revision: u64,
}

impl ExpansionController {
    pub fn new(
        cluster: ClusterRef,
        skeleton: &ClusterSkeleton,
        fetcher: Arc<dyn ObjectFetcher>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let tree = Arc::new(build_skeleton(&cluster, skeleton));
        Self {
            cluster,
            fetcher,
            sink,
            tree,
            loading: HashMap::new(),
            epoch: 0,
            next_ticket: 0,
            revision: 0,
        }
    }

    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    pub fn tree(&self) -> Arc<EntityNode> {
        Arc::clone(&self.tree)
    }

    /// Bumped whenever the published tree changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self, key: &LoadingGroupKey) -> Option<LoadState> {
        let node = self.group_node(key)?;
        Some(if node.loaded {
            LoadState::Loaded
        } else if self.loading.contains_key(key) {
            LoadState::Loading
        } else {
            LoadState::Collapsed
        })
    }

    pub fn loading_keys(&self) -> impl Iterator<Item = &LoadingGroupKey> {
        self.loading.keys()
    }

    pub fn request(&mut self, key: LoadingGroupKey) -> Request {
        match self.state(&key) {
            None => {
                debug!(group = %key, "expansion requested for unknown group");
                Request::UnknownGroup
            }
            Some(LoadState::Loaded) => Request::AlreadyLoaded,
            Some(LoadState::Loading) => match self.loading.get(&key) {
                Some(pending) => Request::Coalesced(pending.clone()),
                None => Request::UnknownGroup,
            },
            Some(LoadState::Collapsed) => {
                let handle = self
                    .fetcher
                    .fetch_objects_for_group(&self.cluster.id, &key)
                    .map(|result| result.map(Arc::new).map_err(Arc::new))
                    .boxed()
                    .shared();
                self.next_ticket += 1;
                let pending = PendingExpansion {
                    key: key.clone(),
                    epoch: self.epoch,
                    ticket: self.next_ticket,
                    handle,
                };
                debug!(group = %key, ticket = pending.ticket, "expansion started");
                self.loading.insert(key, pending.clone());
                Request::Started(pending)
            }
        }
    }

    /// Applies the outcome of a fetch. Results that no longer correspond to
    /// the current loading state are discarded without touching the tree.
    pub fn resolve(&mut self, pending: &PendingExpansion, result: FetchResult) -> Resolution {
        if pending.epoch != self.epoch {
            debug!(group = %pending.key, "discarding result from a previous cluster");
            return Resolution::Discarded;
        }
        let current = self
            .loading
            .get(&pending.key)
            .is_some_and(|loading| loading.ticket == pending.ticket);
        if !current {
            debug!(group = %pending.key, "discarding result for a group no longer loading");
            return Resolution::Discarded;
        }
        self.loading.remove(&pending.key);

        match result {
            Ok(objects) => {
                let Some(merged) = merge_group(&self.tree, &pending.key, &objects) else {
                    debug!(group = %pending.key, "group vanished before its contents arrived");
                    return Resolution::Discarded;
                };
                let added = merged
                    .node_count()
                    .saturating_sub(self.tree.node_count());
                self.tree = Arc::new(merged);
                self.revision += 1;
                info!(group = %pending.key, added, "group expanded");
                Resolution::Merged { added }
            }
            Err(error) => {
                let error = ExpansionError::FetchFailed {
                    key: pending.key.clone(),
                    message: format!("{error:#}"),
                };
                warn!(error = %error, "expansion failed");
                self.sink.notify(Notification::error(error.to_string()));
                Resolution::Reverted(error)
            }
        }
    }

    pub async fn expand(&mut self, key: LoadingGroupKey) -> Expanded {
        let pending = match self.request(key) {
            Request::AlreadyLoaded => return Expanded::AlreadyLoaded,
            Request::UnknownGroup => return Expanded::UnknownGroup,
            Request::Started(pending) | Request::Coalesced(pending) => pending,
        };
        let result = pending.wait().await;
        Expanded::Resolved(self.resolve(&pending, result))
    }

    /// Grows the tree from a fresh top-level listing.
    pub fn sync_skeleton(&mut self, skeleton: &ClusterSkeleton) {
        let synced = sync_skeleton(&self.tree, skeleton);
        if synced != *self.tree {
            self.tree = Arc::new(synced);
            self.revision += 1;
        }
    }

    pub fn set_fetcher(&mut self, fetcher: Arc<dyn ObjectFetcher>) {
        self.fetcher = fetcher;
    }

    /// Switches to another cluster. Fetches still in flight resolve as stale.
    pub fn reset(&mut self, cluster: ClusterRef, skeleton: &ClusterSkeleton) {
        self.tree = Arc::new(build_skeleton(&cluster, skeleton));
        self.cluster = cluster;
        self.loading.clear();
        self.epoch += 1;
        self.revision += 1;
    }

    fn group_node(&self, key: &LoadingGroupKey) -> Option<&EntityNode> {
        self.tree
            .find(&key.node_id())
            .filter(|node| node.group_key.as_ref() == Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Expanded, ExpansionController, ExpansionError, LoadState, ObjectFetcher, Request,
        Resolution,
    };
    use crate::graph::{CompileOptions, compile};
    use crate::model::{ClusterObject, ClusterRef, ClusterSkeleton, LoadingGroupKey};
    use crate::notify::NotificationKind;
    use crate::notify::testing::RecordingSink;
    use anyhow::anyhow;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedFetcher {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<anyhow::Result<Vec<ClusterObject>>>>,
    }

    impl ScriptedFetcher {
        fn with(responses: Vec<anyhow::Result<Vec<ClusterObject>>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(responses.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ObjectFetcher for ScriptedFetcher {
        fn fetch_objects_for_group(
            &self,
            _cluster_id: &str,
            _key: &LoadingGroupKey,
        ) -> BoxFuture<'static, anyhow::Result<Vec<ClusterObject>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()));
            async move { response }.boxed()
        }
    }

    fn skeleton() -> ClusterSkeleton {
        ClusterSkeleton {
            namespaces: vec![ClusterObject::namespace("default")],
            cluster_wide_kinds: Vec::new(),
        }
    }

    fn two_pods() -> Vec<ClusterObject> {
        vec![
            ClusterObject::pod("default", "a"),
            ClusterObject::pod("default", "b"),
        ]
    }

    fn controller(
        fetcher: Arc<ScriptedFetcher>,
    ) -> (ExpansionController, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let controller = ExpansionController::new(
            ClusterRef::new("c1", "prod"),
            &skeleton(),
            fetcher,
            sink.clone(),
        );
        (controller, sink)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let fetcher = ScriptedFetcher::with(vec![Ok(two_pods())]);
        let (mut controller, _) = controller(fetcher.clone());
        let key = LoadingGroupKey::namespace("default");

        let Request::Started(first) = controller.request(key.clone()) else {
            panic!("first request should start a fetch");
        };
        let Request::Coalesced(second) = controller.request(key.clone()) else {
            panic!("second request should coalesce");
        };
        assert_eq!(controller.state(&key), Some(LoadState::Loading));

        let (first_result, second_result) = futures::join!(first.wait(), second.wait());
        assert_eq!(fetcher.calls(), 1);

        assert_eq!(
            controller.resolve(&first, first_result),
            Resolution::Merged { added: 2 }
        );
        assert_eq!(controller.resolve(&second, second_result), Resolution::Discarded);
        assert_eq!(controller.state(&key), Some(LoadState::Loaded));
    }

    #[tokio::test]
    async fn expanding_a_namespace_merges_its_pods() {
        let fetcher = ScriptedFetcher::with(vec![Ok(two_pods())]);
        let (mut controller, _) = controller(fetcher);
        let key = LoadingGroupKey::namespace("default");
        let before = controller.tree();
        let revision = controller.revision();

        assert_eq!(
            controller.expand(key.clone()).await,
            Expanded::Resolved(Resolution::Merged { added: 2 })
        );
        assert_eq!(controller.state(&key), Some(LoadState::Loaded));
        assert!(controller.revision() > revision);

        let graph = compile(&controller.tree(), &CompileOptions::default());
        assert_eq!(graph.nodes.len(), 4);
        assert!(graph.nodes.iter().all(|node| !node.placeholder));

        // the earlier snapshot is untouched
        assert!(before.find("ns/default").is_some_and(|node| node.is_placeholder()));
    }

    #[tokio::test]
    async fn failed_fetch_reverts_notifies_and_allows_retry() {
        let fetcher =
            ScriptedFetcher::with(vec![Err(anyhow!("connection refused")), Ok(two_pods())]);
        let (mut controller, sink) = controller(fetcher.clone());
        let key = LoadingGroupKey::namespace("default");

        let outcome = controller.expand(key.clone()).await;
        let Expanded::Resolved(Resolution::Reverted(ExpansionError::FetchFailed {
            key: failed,
            message,
        })) = outcome
        else {
            panic!("expected a reverted expansion, got {outcome:?}");
        };
        assert_eq!(failed, key);
        assert!(message.contains("connection refused"));
        assert_eq!(controller.state(&key), Some(LoadState::Collapsed));

        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, NotificationKind::Error);

        assert_eq!(
            controller.expand(key.clone()).await,
            Expanded::Resolved(Resolution::Merged { added: 2 })
        );
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn loaded_groups_do_not_refetch() {
        let fetcher = ScriptedFetcher::with(vec![Ok(two_pods())]);
        let (mut controller, _) = controller(fetcher.clone());
        let key = LoadingGroupKey::namespace("default");

        controller.expand(key.clone()).await;
        let revision = controller.revision();
        assert_eq!(controller.expand(key).await, Expanded::AlreadyLoaded);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(controller.revision(), revision);
    }

    #[tokio::test]
    async fn results_after_reset_are_discarded() {
        let fetcher = ScriptedFetcher::with(vec![Ok(two_pods())]);
        let (mut controller, _) = controller(fetcher);
        let key = LoadingGroupKey::namespace("default");

        let Request::Started(pending) = controller.request(key.clone()) else {
            panic!("expected a started fetch");
        };
        controller.reset(ClusterRef::new("c2", "staging"), &skeleton());
        let result = pending.wait().await;

        assert_eq!(controller.resolve(&pending, result), Resolution::Discarded);
        assert_eq!(controller.state(&key), Some(LoadState::Collapsed));
        assert_eq!(controller.cluster().id, "c2");
    }

    #[tokio::test]
    async fn unknown_groups_are_reported() {
        let (mut controller, _) = controller(ScriptedFetcher::with(Vec::new()));
        assert_eq!(
            controller.expand(LoadingGroupKey::namespace("missing")).await,
            Expanded::UnknownGroup
        );
        assert_eq!(controller.state(&LoadingGroupKey::cluster_wide("Node")), None);
    }

    #[test]
    fn skeleton_sync_adds_namespaces_without_collapsing() {
        let (mut controller, _) = controller(ScriptedFetcher::with(Vec::new()));
        let revision = controller.revision();
        controller.sync_skeleton(&ClusterSkeleton {
            namespaces: vec![
                ClusterObject::namespace("default"),
                ClusterObject::namespace("kube-system"),
            ],
            cluster_wide_kinds: vec!["Node".to_string()],
        });

        assert_eq!(controller.revision(), revision + 1);
        assert_eq!(
            controller.state(&LoadingGroupKey::namespace("kube-system")),
            Some(LoadState::Collapsed)
        );
        assert_eq!(
            controller.state(&LoadingGroupKey::cluster_wide("Node")),
            Some(LoadState::Collapsed)
        );

        controller.sync_skeleton(&skeleton());
        assert_eq!(controller.revision(), revision + 1);
    }
}
