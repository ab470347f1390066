use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use k8s_openapi::api::core::v1::{
    ContainerStatus, Namespace, Node, PersistentVolume, Pod, PodStatus,
};
use k8s_openapi::api::networking::v1::IngressClass;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client, Config, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

use crate::expansion::ObjectFetcher;
use crate::model::{
    ClusterObject, ClusterRef, ClusterSkeleton, ClusterWideKind, GroupKind, HealthStatus,
    LoadingGroupKey, cluster_wide_object_id,
};

const LIST_PAGE_SIZE: u32 = 500;

/// Kubernetes access for one kubeconfig context.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    contexts: Vec<String>,
    cluster_wide_kinds: Vec<ClusterWideKind>,
}

impl KubeGateway {
    pub async fn connect(
        context: Option<String>,
        cluster_wide_kinds: Vec<ClusterWideKind>,
    ) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; context switching is unavailable");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let active_context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());
        let cluster = kubeconfig
            .as_ref()
            .and_then(|cfg| {
                cfg.contexts
                    .iter()
                    .find(|named| named.name == active_context)
                    .and_then(|named| named.context.as_ref())
                    .map(|entry| entry.cluster.clone())
            })
            .unwrap_or(cluster_url);
        let mut contexts = kubeconfig
            .as_ref()
            .map(|cfg| {
                cfg.contexts
                    .iter()
                    .map(|named| named.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        contexts.sort();
        contexts.dedup();

        Ok(Self {
            client,
            context: active_context,
            cluster,
            contexts,
            cluster_wide_kinds,
        })
    }

    pub async fn switch_context(&mut self, context: &str) -> Result<()> {
        let switched =
            Self::connect(Some(context.to_string()), self.cluster_wide_kinds.clone()).await?;
        *self = switched;
        Ok(())
    }

    pub fn available_contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The context name doubles as the cluster id; it is unique per kubeconfig.
    pub fn cluster_ref(&self) -> ClusterRef {
        ClusterRef::new(self.context.clone(), self.cluster.clone())
    }

    /// Namespaces plus every configured cluster-wide kind that has objects.
    /// Kinds the current user may not list are left out.
    pub async fn fetch_skeleton(&self) -> Result<ClusterSkeleton> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = list_all(&namespaces)
            .await
            .context("failed to list namespaces")?
            .into_iter()
            .map(|namespace| {
                let health = namespace
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.as_deref())
                    .map(namespace_health)
                    .unwrap_or_default();
                ClusterObject::namespace(&namespace.name_any())
                    .with_health(health)
                    .with_api_version("v1")
            })
            .collect();

        let probes = self.cluster_wide_kinds.iter().map(|kind| {
            let client = self.client.clone();
            let kind = *kind;
            async move {
                let resource = api_resource(kind);
                let api: Api<DynamicObject> = Api::all_with(client, &resource);
                match api.list(&ListParams::default().limit(1)).await {
                    Ok(list) if !list.items.is_empty() => Some(kind.kind().to_string()),
                    Ok(_) => None,
                    Err(error) => {
                        debug!(kind = kind.kind(), "skipping cluster-wide kind: {error}");
                        None
                    }
                }
            }
        });
        let cluster_wide_kinds = join_all(probes).await.into_iter().flatten().collect();

        Ok(ClusterSkeleton {
            namespaces,
            cluster_wide_kinds,
        })
    }
}

impl ObjectFetcher for KubeGateway {
    fn fetch_objects_for_group(
        &self,
        cluster_id: &str,
        key: &LoadingGroupKey,
    ) -> BoxFuture<'static, Result<Vec<ClusterObject>>> {
        let client = self.client.clone();
        let context = self.context.clone();
        let cluster_id = cluster_id.to_string();
        let key = key.clone();
        async move {
            if cluster_id != context {
                anyhow::bail!("cluster {cluster_id} is no longer the active context");
            }
            match key.group_kind {
                GroupKind::Namespace => fetch_namespace_objects(client, &key.group_id).await,
                GroupKind::ClusterWideKind => {
                    let kind = ClusterWideKind::from_kind(&key.group_id).with_context(|| {
                        format!("unsupported cluster-wide kind {}", key.group_id)
                    })?;
                    fetch_cluster_wide_objects(client, kind).await
                }
            }
        }
        .boxed()
    }
}

async fn fetch_namespace_objects(client: Client, namespace: &str) -> Result<Vec<ClusterObject>> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let list = list_all(&pods)
        .await
        .with_context(|| format!("failed to list pods in namespace {namespace}"))?;

    let mut objects = Vec::new();
    for pod in list {
        let name = pod.name_any();
        let mut object = ClusterObject::pod(namespace, &name)
            .with_health(pod.status.as_ref().map(pod_health).unwrap_or_default())
            .with_api_version("v1");
        if let Some(node) = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) {
            object =
                object.depending_on(cluster_wide_object_id(ClusterWideKind::Nodes.kind(), node));
        }
        objects.push(object);

        let statuses = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_deref())
            .unwrap_or(&[]);
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or(&[]);
        for container in containers {
            let health = statuses
                .iter()
                .find(|status| status.name == container.name)
                .map(container_health)
                .unwrap_or_default();
            objects.push(
                ClusterObject::container(namespace, &name, &container.name)
                    .with_health(health)
                    .with_api_version("v1"),
            );
        }
    }
    Ok(objects)
}

async fn fetch_cluster_wide_objects(
    client: Client,
    kind: ClusterWideKind,
) -> Result<Vec<ClusterObject>> {
    let resource = api_resource(kind);
    let api: Api<DynamicObject> = Api::all_with(client, &resource);
    let list = list_all(&api)
        .await
        .with_context(|| format!("failed to list {}", kind.kind()))?;

    Ok(list
        .into_iter()
        .map(|object| {
            let mut entry = ClusterObject::cluster_wide(kind.kind(), &object.name_any())
                .with_health(cluster_wide_health(kind, &object.data))
                .with_api_version(resource.api_version.clone());
            for target in cluster_wide_dependencies(kind, &object.data) {
                entry = entry.depending_on(target);
            }
            entry
        })
        .collect())
}

fn api_resource(kind: ClusterWideKind) -> ApiResource {
    match kind {
        ClusterWideKind::Nodes => ApiResource::erase::<Node>(&()),
        ClusterWideKind::PersistentVolumes => ApiResource::erase::<PersistentVolume>(&()),
        ClusterWideKind::StorageClasses => ApiResource::erase::<StorageClass>(&()),
        ClusterWideKind::IngressClasses => ApiResource::erase::<IngressClass>(&()),
        ClusterWideKind::ClusterRoles => ApiResource::erase::<ClusterRole>(&()),
        ClusterWideKind::ClusterRoleBindings => ApiResource::erase::<ClusterRoleBinding>(&()),
        ClusterWideKind::CustomResourceDefinitions => {
            ApiResource::erase::<CustomResourceDefinition>(&())
        }
    }
}

async fn list_all<K>(api: &Api<K>) -> kube::Result<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    collect_pages(|token| async move {
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
        if let Some(token) = &token {
            params = params.continue_token(token);
        }
        let page = api.list(&params).await?;
        Ok::<_, kube::Error>((page.items, page.metadata.continue_))
    })
    .await
}

/// Follows continue tokens until the server reports the last page.
async fn collect_pages<T, E, F, Fut>(mut fetch_page: F) -> std::result::Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = std::result::Result<(Vec<T>, Option<String>), E>>,
{
    let mut items = Vec::new();
    let mut token = None;
    loop {
        let (page, next) = fetch_page(token).await?;
        items.extend(page);
        token = next_page_token(next);
        if token.is_none() {
            return Ok(items);
        }
    }
}

fn next_page_token(token: Option<String>) -> Option<String> {
    token.filter(|token| !token.is_empty())
}

fn namespace_health(phase: &str) -> HealthStatus {
    match phase {
        "Active" => HealthStatus::Healthy,
        "Terminating" => HealthStatus::Warning,
        _ => HealthStatus::Unknown,
    }
}

fn pod_health(status: &PodStatus) -> HealthStatus {
    let statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    if statuses
        .iter()
        .any(|container| container_health(container) == HealthStatus::Critical)
    {
        return HealthStatus::Critical;
    }
    match status.phase.as_deref() {
        Some("Running") if statuses.iter().all(|container| container.ready) => {
            HealthStatus::Healthy
        }
        Some("Running") | Some("Pending") => HealthStatus::Warning,
        Some("Succeeded") => HealthStatus::Healthy,
        Some("Failed") => HealthStatus::Critical,
        _ => HealthStatus::Unknown,
    }
}

fn container_health(container: &ContainerStatus) -> HealthStatus {
    let Some(state) = container.state.as_ref() else {
        return HealthStatus::Unknown;
    };
    if state.running.is_some() {
        return if container.ready {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };
    }
    if let Some(waiting) = state.waiting.as_ref() {
        return match waiting.reason.as_deref() {
            Some(
                "CrashLoopBackOff"
                | "ImagePullBackOff"
                | "ErrImagePull"
                | "CreateContainerConfigError",
            ) => HealthStatus::Critical,
            _ => HealthStatus::Warning,
        };
    }
    if let Some(terminated) = state.terminated.as_ref() {
        return if terminated.exit_code == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Critical
        };
    }
    HealthStatus::Unknown
}

fn cluster_wide_health(kind: ClusterWideKind, data: &Value) -> HealthStatus {
    match kind {
        ClusterWideKind::Nodes => match condition_status(data, "Ready") {
            Some("True") => HealthStatus::Healthy,
            Some("False") => HealthStatus::Critical,
            _ => HealthStatus::Unknown,
        },
        ClusterWideKind::PersistentVolumes => {
            match data.pointer("/status/phase").and_then(Value::as_str) {
                Some("Bound" | "Available") => HealthStatus::Healthy,
                Some("Released" | "Pending") => HealthStatus::Warning,
                Some("Failed") => HealthStatus::Critical,
                _ => HealthStatus::Unknown,
            }
        }
        ClusterWideKind::CustomResourceDefinitions => match condition_status(data, "Established") {
            Some("True") => HealthStatus::Healthy,
            Some(_) => HealthStatus::Warning,
            None => HealthStatus::Unknown,
        },
        ClusterWideKind::StorageClasses
        | ClusterWideKind::IngressClasses
        | ClusterWideKind::ClusterRoles
        | ClusterWideKind::ClusterRoleBindings => HealthStatus::Healthy,
    }
}

fn condition_status<'v>(data: &'v Value, condition: &str) -> Option<&'v str> {
    data.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("type").and_then(Value::as_str) == Some(condition))?
        .get("status")?
        .as_str()
}

fn cluster_wide_dependencies(kind: ClusterWideKind, data: &Value) -> Vec<String> {
    match kind {
        ClusterWideKind::PersistentVolumes => data
            .pointer("/spec/storageClassName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(|name| {
                vec![cluster_wide_object_id(
                    ClusterWideKind::StorageClasses.kind(),
                    name,
                )]
            })
            .unwrap_or_default(),
        ClusterWideKind::ClusterRoleBindings => {
            let role_ref = data.get("roleRef");
            let role_kind = role_ref
                .and_then(|role| role.get("kind"))
                .and_then(Value::as_str);
            let role_name = role_ref
                .and_then(|role| role.get("name"))
                .and_then(Value::as_str);
            match (role_kind, role_name) {
                (Some("ClusterRole"), Some(name)) => vec![cluster_wide_object_id(
                    ClusterWideKind::ClusterRoles.kind(),
                    name,
                )],
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}
