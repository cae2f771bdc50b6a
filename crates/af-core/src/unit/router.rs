use std::collections::HashMap;
use std::sync::Arc;

use orion_error::prelude::*;
use orion_error::StructError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{CoreReason, CoreResult};

use super::{KindRegistry, NodeId, UnitKind, UnitSpec, WorkerHandle, WorkerTask};

// ---------------------------------------------------------------------------
// Router messages
// ---------------------------------------------------------------------------

enum RouterMsg {
    Cast {
        spec: UnitSpec,
        task: WorkerTask,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    WorkerExited {
        spec: UnitSpec,
        generation: u64,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// RouterHandle
// ---------------------------------------------------------------------------

/// Handle to a node's unit router. Cheap to clone; `cast` is safe from any
/// execution context.
#[derive(Clone)]
pub struct RouterHandle {
    node: NodeId,
    tx: mpsc::UnboundedSender<RouterMsg>,
}

impl RouterHandle {
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Route `task` to the worker for `spec`, starting one if needed.
    ///
    /// The reply confirms delivery only; results travel through channels the
    /// task captures. Start failures are reported here synchronously.
    pub async fn cast(&self, spec: UnitSpec, task: WorkerTask) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RouterMsg::Cast {
                spec,
                task,
                reply: reply_tx,
            })
            .map_err(|_| {
                StructError::from(CoreReason::NodeUnreachable)
                    .with_detail(format!("router on {} stopped", self.node))
            })?;
        reply_rx.await.map_err(|_| {
            StructError::from(CoreReason::UnitCast).with_detail("router dropped cast reply")
        })?
    }

    /// Request router shutdown; registered workers are stopped.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RouterMsg::Shutdown);
    }
}

/// Start the unit router for `node`. Returns the handle plus the join handle
/// for shutdown sequencing.
pub fn spawn_router(node: NodeId, kinds: Arc<KindRegistry>) -> (RouterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router {
        node: node.clone(),
        kinds,
        table: HashMap::new(),
        next_generation: 0,
        self_tx: tx.clone(),
    };
    let join = tokio::spawn(router.run(rx));
    (RouterHandle { node, tx }, join)
}

// ---------------------------------------------------------------------------
// Router actor
// ---------------------------------------------------------------------------

struct WorkerEntry {
    worker: WorkerHandle,
    generation: u64,
}

/// Per-node router actor: owns the spec → worker table (single writer),
/// starts workers lazily, and prunes entries when workers terminate. There
/// is no supervision across restarts: the next cast after a death simply
/// starts a fresh worker.
struct Router {
    node: NodeId,
    kinds: Arc<KindRegistry>,
    table: HashMap<UnitSpec, WorkerEntry>,
    next_generation: u64,
    self_tx: mpsc::UnboundedSender<RouterMsg>,
}

impl Router {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                RouterMsg::Cast { spec, task, reply } => {
                    let result = self.cast(spec, task).await;
                    let _ = reply.send(result);
                }
                RouterMsg::WorkerExited { spec, generation } => {
                    // A stale notification must not evict a restarted worker.
                    if self
                        .table
                        .get(&spec)
                        .is_some_and(|e| e.generation == generation)
                    {
                        self.table.remove(&spec);
                        log::debug!("node {}: worker {spec} exited, entry pruned", self.node);
                    }
                }
                RouterMsg::Shutdown => break,
            }
        }
        // Dropping the table closes every worker's delivery channel; workers
        // exit when their receiver drains.
        let workers = self.table.len();
        self.table.clear();
        if workers > 0 {
            log::debug!("node {}: router stopped, {workers} workers signalled", self.node);
        }
    }

    async fn cast(&mut self, spec: UnitSpec, task: WorkerTask) -> CoreResult<()> {
        let kind = self
            .kinds
            .get(&spec.kind)
            .ok_or_else(|| {
                StructError::from(CoreReason::UnitCast)
                    .with_detail(format!("unknown unit kind {:?}", spec.kind))
            })?
            .clone();

        if !self.table.contains_key(&spec) {
            let entry = self.start_worker(kind.as_ref(), &spec).await?;
            self.table.insert(spec.clone(), entry);
        }
        let Some(entry) = self.table.get(&spec) else {
            return Err(
                StructError::from(CoreReason::UnitCast).with_detail("worker table entry vanished")
            );
        };

        match kind.deliver(&entry.worker, task) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The worker died between registration and delivery (its exit
                // notification may still be queued). Prune the stale entry so
                // the next cast starts a fresh worker; this delivery surfaces
                // as a failure to the element-level caller.
                self.table.remove(&spec);
                log::warn!("node {}: worker {spec} rejected delivery, pruned", self.node);
                Err(e)
            }
        }
    }

    async fn start_worker(&mut self, kind: &dyn UnitKind, spec: &UnitSpec) -> CoreResult<WorkerEntry> {
        let mut worker = kind.start(&spec.arg).await?;
        let generation = self.next_generation;
        self.next_generation += 1;

        // Subscribe to termination: prune the table entry when the worker's
        // task finishes, normally (TTL) or not (panic).
        if let Some(join) = worker.take_join() {
            let notify = self.self_tx.clone();
            let spec = spec.clone();
            let node = self.node.clone();
            tokio::spawn(async move {
                if join.await.is_err() {
                    log::warn!("node {node}: worker {spec} crashed");
                }
                let _ = notify.send(RouterMsg::WorkerExited { spec, generation });
            });
        }

        log::debug!("node {}: started worker {spec}", self.node);
        Ok(WorkerEntry { worker, generation })
    }
}
