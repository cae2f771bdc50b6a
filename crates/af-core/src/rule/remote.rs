use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orion_error::prelude::*;
use orion_error::StructError;
use parking_lot::RwLock;
use serde_json::Value;

use crate::element::Element;
use crate::error::{CoreReason, CoreResult};
use crate::unit::{NodeId, UnitSpec};

use super::{HandlerFn, RuleOutcome};

// ---------------------------------------------------------------------------
// CastRequest
// ---------------------------------------------------------------------------

/// The wire shape of a remote rule hop: instead of shipping a closure, the
/// continuation is looked up by name on the target node and applied to the
/// worker's state together with the element and rule state carried here.
#[derive(Debug, Clone)]
pub struct CastRequest {
    pub handler: String,
    pub elem: Element,
    pub state: Value,
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Named remote-rule continuations, registered on every node when a pipeline
/// is attached. Names are qualified `pipeline/group-tag/rule-name`.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<HashMap<String, Arc<HandlerFn>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation; duplicate names are rejected so two
    /// pipelines cannot silently shadow each other's handlers.
    pub fn register(&self, name: impl Into<String>, handler: Arc<HandlerFn>) -> CoreResult<()> {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.contains_key(&name) {
            return Err(StructError::from(CoreReason::UnitCast)
                .with_detail(format!("handler {name:?} already registered")));
        }
        inner.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<HandlerFn>> {
        self.inner.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Caster — the seam between the rule engine and the unit layer
// ---------------------------------------------------------------------------

/// Submits remote-rule work to the cluster. The rule engine only needs these
/// two operations; the runtime crate provides the real cluster-backed
/// implementation.
#[async_trait]
pub trait Caster: Send + Sync {
    /// Execute `req` against the worker identified by `spec` and return the
    /// continuation's outcome. Start failures, crashes, unreachable nodes
    /// and reply timeouts all surface as errors here.
    async fn call(&self, spec: &UnitSpec, req: CastRequest) -> CoreResult<RuleOutcome>;

    /// Home node of `spec`, for hop bookkeeping.
    fn home_node(&self, spec: &UnitSpec) -> CoreResult<NodeId>;
}

/// Caster for pipelines that use no remote rules: any cast is an error.
pub struct NoCluster;

#[async_trait]
impl Caster for NoCluster {
    async fn call(&self, spec: &UnitSpec, _req: CastRequest) -> CoreResult<RuleOutcome> {
        Err(StructError::from(CoreReason::NodeUnreachable)
            .with_detail(format!("no cluster attached, cannot reach {spec}")))
    }

    fn home_node(&self, spec: &UnitSpec) -> CoreResult<NodeId> {
        Err(StructError::from(CoreReason::NodeUnreachable)
            .with_detail(format!("no cluster attached, cannot resolve {spec}")))
    }
}
