mod router;
mod simple;

pub use router::{RouterHandle, spawn_router};
pub use simple::SimpleUnit;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use orion_error::prelude::*;
use orion_error::StructError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// NodeId / UnitSpec
// ---------------------------------------------------------------------------

/// Logical node name. One unit router runs per node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a worker: `(kind, arg)`. Two specs are equal iff both
/// components are equal; at most one worker per spec is live in the cluster
/// at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitSpec {
    pub kind: String,
    pub arg: String,
}

impl UnitSpec {
    pub fn new(kind: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            arg: arg.into(),
        }
    }
}

impl fmt::Display for UnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.arg)
    }
}

// ---------------------------------------------------------------------------
// Worker contract
// ---------------------------------------------------------------------------

/// State held by a worker; constructed on start, accessed only on the home
/// node, destroyed when the worker exits.
pub type WorkerState = Box<dyn Any + Send>;

/// A task executed with the worker's state. Side effects only; replies go
/// through channels captured by the closure.
pub type WorkerTask = Box<dyn FnOnce(&mut WorkerState) + Send>;

/// Downcast a worker's state to its concrete type.
pub fn state_of<S: 'static>(state: &mut WorkerState) -> Option<&mut S> {
    state.downcast_mut::<S>()
}

/// Handle to a live worker: its delivery channel plus the join handle the
/// router uses to observe termination.
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerTask>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn new(tx: mpsc::UnboundedSender<WorkerTask>, join: JoinHandle<()>) -> Self {
        Self {
            tx,
            join: Some(join),
        }
    }

    /// Enqueue a task; `false` if the worker has already exited.
    pub fn send(&self, task: WorkerTask) -> bool {
        self.tx.send(task).is_ok()
    }

    pub(crate) fn take_join(&mut self) -> Option<JoinHandle<()>> {
        self.join.take()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle").finish_non_exhaustive()
    }
}

/// Capability contract a worker kind must satisfy.
///
/// `home_node` must be pure and stable: the router relies on it to keep the
/// per-spec worker singleton on one node.
#[async_trait]
pub trait UnitKind: Send + Sync {
    /// Pure, stable mapping from unit argument to home node.
    fn home_node(&self, arg: &str) -> NodeId;

    /// Construct the worker; may load local data.
    async fn start(&self, arg: &str) -> CoreResult<WorkerHandle>;

    /// Enqueue `task` for execution with the worker's state; non-blocking.
    fn deliver(&self, worker: &WorkerHandle, task: WorkerTask) -> CoreResult<()> {
        if worker.send(task) {
            Ok(())
        } else {
            Err(StructError::from(CoreReason::UnitCast).with_detail("worker channel closed"))
        }
    }
}

// ---------------------------------------------------------------------------
// KindRegistry
// ---------------------------------------------------------------------------

/// Unit kinds by name, fixed at cluster boot.
#[derive(Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn UnitKind>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, kind: Arc<dyn UnitKind>) {
        self.kinds.insert(name.into(), kind);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn UnitKind>> {
        self.kinds.get(name)
    }

    /// Resolve the home node of `spec` through its registered kind.
    pub fn resolve_home(&self, spec: &UnitSpec) -> CoreResult<NodeId> {
        let kind = self.kinds.get(&spec.kind).ok_or_else(|| {
            StructError::from(CoreReason::UnitCast)
                .with_detail(format!("unknown unit kind {:?}", spec.kind))
        })?;
        Ok(kind.home_node(&spec.arg))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
