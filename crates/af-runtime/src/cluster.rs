use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orion_error::op_context;
use orion_error::prelude::*;
use orion_error::StructError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use af_config::AugConfig;
use af_core::error::{CoreReason, CoreResult};
use af_core::rule::{CastRequest, Caster, HandlerRegistry, Pipeline, RuleOutcome};
use af_core::stream::EmitFn;
use af_core::unit::{
    KindRegistry, NodeId, RouterHandle, UnitKind, UnitSpec, WorkerTask, spawn_router,
};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::FlowMetrics;

// ---------------------------------------------------------------------------
// ClusterBuilder
// ---------------------------------------------------------------------------

/// Assembles a cluster: node set, unit kinds, cast timeout. `start` boots
/// one unit router per node.
pub struct ClusterBuilder {
    nodes: Vec<NodeId>,
    kinds: KindRegistry,
    cast_timeout: Duration,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            kinds: KindRegistry::new(),
            cast_timeout: Duration::from_secs(5),
        }
    }

    pub fn node(mut self, name: impl Into<String>) -> Self {
        self.nodes.push(NodeId::new(name));
        self
    }

    /// Register a unit kind under `name`; `UnitSpec::kind` refers to it.
    pub fn kind(mut self, name: impl Into<String>, kind: Arc<dyn UnitKind>) -> Self {
        self.kinds.register(name, kind);
        self
    }

    /// Upper bound on waiting for a worker's reply to a routed call.
    pub fn cast_timeout(mut self, timeout: Duration) -> Self {
        self.cast_timeout = timeout;
        self
    }

    pub fn start(self) -> RuntimeResult<Arc<Cluster>> {
        let mut op = op_context!("cluster-start").with_auto_log();
        if self.nodes.is_empty() {
            return Err(StructError::from(RuntimeReason::NoNodes)
                .with_detail("cluster.nodes must name at least one node"));
        }

        let kinds = Arc::new(self.kinds);
        let mut routers = HashMap::new();
        let mut joins = Vec::new();
        for node in self.nodes {
            if routers.contains_key(&node) {
                return Err(StructError::from(RuntimeReason::DuplicateNode(
                    node.as_str().to_string(),
                )));
            }
            let (handle, join) = spawn_router(node.clone(), Arc::clone(&kinds));
            routers.insert(node, handle);
            joins.push(join);
        }

        op.record("nodes", routers.len().to_string().as_str());
        af_sys!(info, nodes = routers.len(), kinds = kinds.len(), "cluster started");
        op.mark_suc();
        Ok(Arc::new(Cluster {
            routers,
            kinds,
            handlers: HandlerRegistry::new(),
            metrics: Arc::new(FlowMetrics::new()),
            cast_timeout: self.cast_timeout,
            router_joins: Mutex::new(joins),
        }))
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// The running cluster: one unit router per node, the kind and handler
/// registries shared by every node, and the public `cast`/`call` operations.
pub struct Cluster {
    routers: HashMap<NodeId, RouterHandle>,
    kinds: Arc<KindRegistry>,
    handlers: HandlerRegistry,
    metrics: Arc<FlowMetrics>,
    cast_timeout: Duration,
    router_joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Cluster {
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::new()
    }

    /// One-node cluster named `local`, for single-process runs and tests.
    pub fn single_node() -> RuntimeResult<Arc<Self>> {
        ClusterBuilder::new().node("local").start()
    }

    /// Builder pre-populated from configuration; register kinds on the
    /// returned builder, then `start`.
    pub fn from_config(config: &AugConfig) -> ClusterBuilder {
        let mut builder =
            ClusterBuilder::new().cast_timeout(config.unit.cast_timeout.as_duration());
        for node in &config.cluster.nodes {
            builder = builder.node(node.clone());
        }
        builder
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.routers.keys()
    }

    pub fn metrics(&self) -> Arc<FlowMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Attach a pipeline: register its remote-rule continuations on this
    /// cluster's handler registry and return the emit routine for
    /// [`af_core::stream::start`].
    pub fn attach_pipeline(cluster: &Arc<Self>, pipeline: &Arc<Pipeline>) -> RuntimeResult<EmitFn> {
        pipeline.register_handlers(&cluster.handlers).err_conv()?;
        cluster.metrics.inc_pipelines_attached();
        af_pipe!(info, pipeline = pipeline.name(), "pipeline attached");
        Ok(Pipeline::emit_fn(pipeline, Arc::clone(cluster) as Arc<dyn Caster>))
    }

    /// Route a worker task to the home node of `spec`, starting the worker
    /// there if needed. Public so custom emit routines can reach workers
    /// directly; results travel through channels the task captures.
    pub async fn cast(&self, spec: &UnitSpec, task: WorkerTask) -> CoreResult<()> {
        let node = self.kinds.resolve_home(spec)?;
        let Some(router) = self.routers.get(&node) else {
            self.metrics.inc_cast_errors();
            return Err(StructError::from(CoreReason::NodeUnreachable)
                .with_detail(format!("node {node} is not part of this cluster")));
        };
        self.metrics.inc_casts();
        let result = router.cast(spec.clone(), task).await;
        if let Err(e) = &result {
            self.metrics.inc_cast_errors();
            af_unit!(warn, spec = %spec, error = %e, "cast failed");
        }
        result
    }

    /// Stop every router (which signals its registered workers) and wait for
    /// them to finish.
    pub async fn shutdown(&self) {
        af_sys!(info, "cluster shutting down");
        for router in self.routers.values() {
            router.shutdown();
        }
        let joins = {
            let mut guard = self
                .router_joins
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for join in joins {
            if let Err(e) = join.await {
                af_sys!(warn, error = %e, "router task panicked");
            }
        }
        af_sys!(debug, "cluster shutdown complete");
    }
}

#[async_trait]
impl Caster for Cluster {
    /// Named-handler remote call: resolve the continuation on this cluster,
    /// wrap it with a reply channel into a worker task, route it, and await
    /// the outcome under `cast_timeout`.
    async fn call(&self, spec: &UnitSpec, req: CastRequest) -> CoreResult<RuleOutcome> {
        let Some(handler) = self.handlers.get(&req.handler) else {
            return Err(StructError::from(CoreReason::UnitCast)
                .with_detail(format!("no handler {:?} registered", req.handler)));
        };
        self.metrics.inc_calls();

        let (reply_tx, reply_rx) = oneshot::channel();
        let CastRequest { elem, state, .. } = req;
        let task: WorkerTask = Box::new(move |worker_state| {
            let _ = reply_tx.send(handler(worker_state, &elem, &state));
        });
        self.cast(spec, task).await?;

        match tokio::time::timeout(self.cast_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(StructError::from(CoreReason::UnitCast)
                .with_detail(format!("worker {spec} dropped its reply (crashed mid-call)"))),
            Err(_) => Err(StructError::from(CoreReason::UnitCast)
                .with_detail(format!("no reply from {spec} within {:?}", self.cast_timeout))),
        }
    }

    fn home_node(&self, spec: &UnitSpec) -> CoreResult<NodeId> {
        self.kinds.resolve_home(spec)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_node_boots_and_stops() {
        let cluster = Cluster::single_node().unwrap();
        assert_eq!(cluster.nodes().count(), 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn empty_builder_is_rejected() {
        assert!(ClusterBuilder::new().start().is_err());
    }

    #[tokio::test]
    async fn duplicate_nodes_are_rejected() {
        let result = ClusterBuilder::new().node("a").node("a").start();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn from_config_takes_topology_and_timeout() {
        let config: AugConfig = r#"
[cluster]
nodes = ["alpha", "beta"]

[unit]
cast_timeout = "1s"
"#
        .parse()
        .unwrap();
        let cluster = Cluster::from_config(&config).start().unwrap();
        assert_eq!(cluster.nodes().count(), 2);
        assert_eq!(cluster.cast_timeout, Duration::from_secs(1));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn cast_to_unknown_kind_fails() {
        let cluster = Cluster::single_node().unwrap();
        let spec = UnitSpec::new("nope", "x");
        let err = cluster.cast(&spec, Box::new(|_| {})).await;
        assert!(err.is_err());
        assert_eq!(cluster.metrics().cast_errors(), 0, "resolution failed before routing");
        cluster.shutdown().await;
    }
}
