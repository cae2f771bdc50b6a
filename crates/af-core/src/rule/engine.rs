use std::sync::Arc;

use serde_json::Value;

use crate::element::Element;
use crate::error::CoreResult;
use crate::stream::{EmitFn, SinkHandle};
use crate::unit::NodeId;

use super::remote::{CastRequest, Caster};
use super::{Pipeline, RuleAction, RuleGroup, RuleOutcome};

impl Pipeline {
    /// Produce an emit routine for [`crate::stream::start`]: each element
    /// task traverses the rule groups in order and delivers the final
    /// element via `done`.
    ///
    /// A rule error is per-element fatal: the task aborts with a warning and
    /// the sink never sees `done` for that element.
    pub fn emit_fn(pipeline: &Arc<Self>, caster: Arc<dyn Caster>) -> EmitFn {
        let pipeline = Arc::clone(pipeline);
        Arc::new(move |sink, elem| {
            let pipeline = Arc::clone(&pipeline);
            let caster = Arc::clone(&caster);
            Box::pin(async move {
                match traverse(&pipeline, caster.as_ref(), &sink, elem).await {
                    Ok(elem) => sink.done(elem),
                    Err(e) => {
                        log::warn!("pipeline {:?}: element aborted: {e}", pipeline.name);
                    }
                }
            })
        })
    }
}

/// Walk every group whose tag matches, in declaration order.
async fn traverse(
    pipeline: &Pipeline,
    caster: &dyn Caster,
    sink: &SinkHandle,
    mut elem: Element,
) -> CoreResult<Element> {
    // The node the element's continuation currently runs on; `None` until
    // the first remote hop.
    let mut node: Option<NodeId> = None;
    for group in &pipeline.groups {
        if group.tag != elem.tag {
            continue;
        }
        elem = run_group(pipeline, group, caster, sink, elem, &mut node).await?;
    }
    Ok(elem)
}

/// Run one group: init hook, then scan rules top-down, restarting from the
/// top after every fire. The apply-map guarantees each rule fires at most
/// once per traversal of the group, so a later rule may enable an earlier
/// one exactly once.
async fn run_group(
    pipeline: &Pipeline,
    group: &RuleGroup,
    caster: &dyn Caster,
    sink: &SinkHandle,
    elem: Element,
    node: &mut Option<NodeId>,
) -> CoreResult<Element> {
    let (mut elem, mut state) = match &group.init {
        Some(init) => init(elem, &group.args)?,
        None => (elem, Value::Null),
    };
    let mut applied = vec![false; group.rules.len()];

    'scan: loop {
        for (idx, rule) in group.rules.iter().enumerate() {
            if applied[idx] || !(rule.matcher)(&elem, &state) {
                continue;
            }
            applied[idx] = true;

            let outcome = match &rule.action {
                RuleAction::Local(action) => action(&elem, &state)?,
                RuleAction::Remote { unit, .. } => {
                    let spec = unit(&elem, &state);
                    let req = CastRequest {
                        handler: pipeline.handler_name(group, rule),
                        elem: elem.clone(),
                        state: state.clone(),
                    };
                    let outcome = caster.call(&spec, req).await?;
                    // The walk resumes where the worker lives.
                    let home = caster.home_node(&spec)?;
                    if node.as_ref() != Some(&home) {
                        log::debug!(
                            "pipeline {:?}: element hopped to node {home} via {spec}",
                            pipeline.name
                        );
                        *node = Some(home);
                    }
                    outcome
                }
            };

            match outcome {
                RuleOutcome::Replace(next) => elem = next,
                RuleOutcome::Emit(extra) => sink.emit(extra),
                RuleOutcome::EmitReplace(extra, next) => {
                    sink.emit(extra);
                    elem = next;
                }
                RuleOutcome::UpdateState(next) => state = next,
            }
            continue 'scan;
        }
        break;
    }

    Ok(elem)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::{NoCluster, Rule};
    use super::*;
    use crate::error::CoreReason;
    use crate::stream;
    use af_config::StreamConfig;
    use orion_error::prelude::*;
    use orion_error::StructError;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> StreamConfig {
        StreamConfig {
            chunk_size: 16,
            done_timeout: Duration::from_millis(50).into(),
        }
    }

    async fn run_one(pipeline: Arc<Pipeline>, elem: Element) -> Vec<Element> {
        let emit_fn = Pipeline::emit_fn(&pipeline, Arc::new(NoCluster));
        stream::start(vec![elem], emit_fn, &config()).collect().await
    }

    fn replace_with(
        f: impl Fn(&Element) -> Element + Send + Sync + 'static,
    ) -> impl Fn(&Element, &Value) -> CoreResult<RuleOutcome> + Send + Sync + 'static {
        move |elem, _| Ok(RuleOutcome::Replace(f(elem)))
    }

    #[tokio::test]
    async fn each_rule_fires_at_most_once() {
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = Arc::clone(&fires);
        // Matcher always true: without the apply-map this would loop forever.
        let pipeline = Pipeline::define(
            "p",
            vec![RuleGroup::new("t").rule(Rule::local(
                "always",
                |_, _| true,
                move |elem, _| {
                    fires2.fetch_add(1, Ordering::SeqCst);
                    Ok(RuleOutcome::Replace(elem.clone()))
                },
            ))],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_rule_enables_earlier_rule() {
        // "early" only matches once "flag" is set, which "late" does after
        // the first scan passes it by. The restart-from-top scan must then
        // fire "early" exactly once.
        let pipeline = Pipeline::define(
            "p",
            vec![
                RuleGroup::new("t")
                    .rule(Rule::local(
                        "early",
                        |elem, _| elem.contains("flag") && !elem.contains("early"),
                        replace_with(|elem| {
                            let mut e = elem.clone();
                            e.set("early", true);
                            e
                        }),
                    ))
                    .rule(Rule::local(
                        "late",
                        |elem, _| !elem.contains("flag"),
                        replace_with(|elem| {
                            let mut e = elem.clone();
                            e.set("flag", true);
                            e
                        }),
                    )),
            ],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("flag"), Some(&json!(true)));
        assert_eq!(out[0].get("early"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn groups_with_other_tags_are_skipped() {
        let touched = Arc::new(AtomicUsize::new(0));
        let touched2 = Arc::clone(&touched);
        let pipeline = Pipeline::define(
            "p",
            vec![
                RuleGroup::new("other").rule(Rule::local(
                    "never_here",
                    move |_, _| {
                        touched2.fetch_add(1, Ordering::SeqCst);
                        true
                    },
                    replace_with(Clone::clone),
                )),
                RuleGroup::new("t").rule(Rule::local(
                    "mark",
                    |elem, _| !elem.contains("seen"),
                    replace_with(|elem| {
                        let mut e = elem.clone();
                        e.set("seen", true);
                        e
                    }),
                )),
            ],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("seen"), Some(&json!(true)));
        // Tag filter bypasses the group without side effects: even the
        // matcher must not run.
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn emitted_elements_start_their_own_traversal() {
        let pipeline = Pipeline::define(
            "p",
            vec![
                RuleGroup::new("parent").rule(Rule::local(
                    "spawn_child",
                    |elem, _| !elem.contains("spawned"),
                    |elem, _| {
                        let mut e = elem.clone();
                        e.set("spawned", true);
                        Ok(RuleOutcome::EmitReplace(vec![Element::new("child")], e))
                    },
                )),
                RuleGroup::new("child").rule(Rule::local(
                    "mark_child",
                    |elem, _| !elem.contains("marked"),
                    replace_with(|elem| {
                        let mut e = elem.clone();
                        e.set("marked", true);
                        e
                    }),
                )),
            ],
        );

        let out = run_one(pipeline, Element::new("parent")).await;
        assert_eq!(out.len(), 2);
        let child = out.iter().find(|e| e.tag == "child").expect("child");
        assert_eq!(child.get("marked"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn emit_outcome_keeps_the_current_element() {
        let pipeline = Pipeline::define(
            "p",
            vec![RuleGroup::new("t").rule(Rule::local(
                "fan_out",
                |elem, _| !elem.contains("fanned"),
                |elem, _| {
                    let mut e = elem.clone();
                    e.set("fanned", true);
                    // Emit keeps the current element untouched, so the guard
                    // field lives only on the copies we emit.
                    Ok(RuleOutcome::Emit(vec![e]))
                },
            ))],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        // Parent fired once (then its apply-map blocks it); the emitted
        // element carries the guard and matches nothing.
        assert_eq!(out.len(), 2);
        assert_eq!(out.iter().filter(|e| e.contains("fanned")).count(), 1);
    }

    #[tokio::test]
    async fn init_hook_seeds_element_and_state() {
        let pipeline = Pipeline::define(
            "p",
            vec![
                RuleGroup::new("t")
                    .with_args(json!({"bonus": 7}))
                    .with_init(|mut elem, args| {
                        elem.set("initialised", true);
                        Ok((elem, args.clone()))
                    })
                    .rule(Rule::local(
                        "use_state",
                        |elem, state| !elem.contains("bonus") && state["bonus"].is_number(),
                        |elem, state| {
                            let mut e = elem.clone();
                            e.set("bonus", state["bonus"].clone());
                            Ok(RuleOutcome::Replace(e))
                        },
                    )),
            ],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("initialised"), Some(&json!(true)));
        assert_eq!(out[0].get("bonus"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn state_update_outcome_feeds_later_matchers() {
        let pipeline = Pipeline::define(
            "p",
            vec![
                RuleGroup::new("t")
                    .rule(Rule::local(
                        "needs_state",
                        |_, state| state == &json!("ready"),
                        replace_with(|elem| {
                            let mut e = elem.clone();
                            e.set("done", true);
                            e
                        }),
                    ))
                    .rule(Rule::local(
                        "set_state",
                        |_, state| state.is_null(),
                        |_, _| Ok(RuleOutcome::UpdateState(json!("ready"))),
                    )),
            ],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn rule_error_aborts_only_that_element() {
        let pipeline = Pipeline::define(
            "p",
            vec![RuleGroup::new("t").rule(Rule::local(
                "explode_on_bad",
                |elem, _| elem.contains("bad"),
                |_, _| Err(StructError::from(CoreReason::RuleExec).with_detail("boom")),
            ))],
        );

        let emit_fn = Pipeline::emit_fn(&pipeline, Arc::new(NoCluster));
        let source = vec![
            Element::new("t").with("bad", true),
            Element::new("t").with("n", 1),
            Element::new("t").with("n", 2),
        ];
        let out = stream::start(source, emit_fn, &config()).collect().await;

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| !e.contains("bad")));
    }

    #[tokio::test]
    async fn remote_rule_without_cluster_aborts_element() {
        let pipeline = Pipeline::define(
            "p",
            vec![RuleGroup::new("t").rule(Rule::remote(
                "fetch",
                |_, _| true,
                |_, _| crate::unit::UnitSpec::new("lookup", "x"),
                |_, elem, _| Ok(RuleOutcome::Replace(elem.clone())),
            ))],
        );

        let out = run_one(pipeline, Element::new("t")).await;
        assert!(out.is_empty());
    }
}
