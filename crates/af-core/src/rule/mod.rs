mod engine;
mod remote;

pub use remote::{CastRequest, Caster, HandlerRegistry, NoCluster};

use std::sync::Arc;

use serde_json::Value;

use crate::element::Element;
use crate::error::CoreResult;
use crate::unit::{UnitSpec, WorkerState};

// ---------------------------------------------------------------------------
// Closure signatures
// ---------------------------------------------------------------------------

/// Predicate deciding whether a rule fires for `(element, rule_state)`.
pub type MatcherFn = dyn Fn(&Element, &Value) -> bool + Send + Sync;

/// Local rule action.
pub type ActionFn = dyn Fn(&Element, &Value) -> CoreResult<RuleOutcome> + Send + Sync;

/// Resolves which worker a remote rule needs for the current element.
pub type UnitSpecFn = dyn Fn(&Element, &Value) -> UnitSpec + Send + Sync;

/// Remote rule continuation, executed on the worker's node with the worker's
/// locally-held state.
pub type HandlerFn = dyn Fn(&mut WorkerState, &Element, &Value) -> CoreResult<RuleOutcome> + Send + Sync;

/// Group entry hook: `(element, group args) → (element', rule_state)`.
pub type InitFn = dyn Fn(Element, &Value) -> CoreResult<(Element, Value)> + Send + Sync;

// ---------------------------------------------------------------------------
// RuleOutcome
// ---------------------------------------------------------------------------

/// Interpretation of a fired rule's result.
#[derive(Debug)]
pub enum RuleOutcome {
    /// Replace the current element (the default interpretation).
    Replace(Element),
    /// Emit additional elements into the stream, keep the current element.
    Emit(Vec<Element>),
    /// Emit additional elements and replace the current element.
    EmitReplace(Vec<Element>, Element),
    /// Update the per-element rule state, keep the current element.
    UpdateState(Value),
}

// ---------------------------------------------------------------------------
// Rule / RuleGroup / Pipeline
// ---------------------------------------------------------------------------

pub(crate) enum RuleAction {
    Local(Arc<ActionFn>),
    Remote {
        unit: Arc<UnitSpecFn>,
        continuation: Arc<HandlerFn>,
    },
}

/// A named `(matcher, action)` pair. Within one element's traversal of a
/// group each rule fires at most once.
pub struct Rule {
    pub(crate) name: String,
    pub(crate) matcher: Arc<MatcherFn>,
    pub(crate) action: RuleAction,
}

impl Rule {
    /// A rule whose action runs wherever the element currently is.
    pub fn local(
        name: impl Into<String>,
        matcher: impl Fn(&Element, &Value) -> bool + Send + Sync + 'static,
        action: impl Fn(&Element, &Value) -> CoreResult<RuleOutcome> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: Arc::new(matcher),
            action: RuleAction::Local(Arc::new(action)),
        }
    }

    /// A rule whose continuation needs a worker's locally-held state; the
    /// traversal hops to the worker's home node.
    pub fn remote(
        name: impl Into<String>,
        matcher: impl Fn(&Element, &Value) -> bool + Send + Sync + 'static,
        unit: impl Fn(&Element, &Value) -> UnitSpec + Send + Sync + 'static,
        continuation: impl Fn(&mut WorkerState, &Element, &Value) -> CoreResult<RuleOutcome>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: Arc::new(matcher),
            action: RuleAction::Remote {
                unit: Arc::new(unit),
                continuation: Arc::new(continuation),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered rules sharing a type-tag filter and an optional entry hook.
pub struct RuleGroup {
    pub(crate) tag: String,
    pub(crate) init: Option<Arc<InitFn>>,
    pub(crate) args: Value,
    pub(crate) rules: Vec<Rule>,
}

impl RuleGroup {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            init: None,
            args: Value::Null,
            rules: Vec::new(),
        }
    }

    /// Entry hook computing the initial `(element, rule_state)` pair.
    pub fn with_init(
        mut self,
        init: impl Fn(Element, &Value) -> CoreResult<(Element, Value)> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Arc::new(init));
        self
    }

    /// Arguments passed to the entry hook.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Ordered list of rule groups, tried left-to-right per element.
pub struct Pipeline {
    pub(crate) name: String,
    pub(crate) groups: Vec<RuleGroup>,
}

impl Pipeline {
    pub fn define(name: impl Into<String>, groups: Vec<RuleGroup>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            groups,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified registry name for a remote rule's continuation.
    pub(crate) fn handler_name(&self, group: &RuleGroup, rule: &Rule) -> String {
        format!("{}/{}/{}", self.name, group.tag, rule.name)
    }

    /// Register every remote rule's continuation under its qualified name.
    /// Called once per node set when the pipeline is attached to a cluster.
    pub fn register_handlers(&self, registry: &HandlerRegistry) -> CoreResult<()> {
        for group in &self.groups {
            for rule in &group.rules {
                if let RuleAction::Remote { continuation, .. } = &rule.action {
                    registry.register(self.handler_name(group, rule), Arc::clone(continuation))?;
                }
            }
        }
        Ok(())
    }
}
