//! Integration Tests for the Binding Engine
//!
//! These tests drive the engine end to end: markup in, data bound, queue
//! drained on a tokio runtime, serialized markup out.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use trellis_core::{
    scope_from_json, Document, Engine, EngineConfig, Evaluator, FrameSource, Mutation, MutationQueue,
    Priority, QueueConfig, QueueError, Scope, Value,
};

fn engine(markup: &str) -> Engine {
    let mut config = EngineConfig::default();
    config.queue.frame = FrameSource::Immediate;
    Engine::new(Document::parse(markup).expect("valid markup"), config).expect("valid config")
}

fn root(engine: &Engine) -> trellis_core::NodeHandle {
    engine.document().lock().root()
}

fn markup(engine: &Engine) -> String {
    engine.document().lock().html()
}

/// Test that a keyed users list renders its rows once the queue drains.
#[tokio::test]
async fn users_list_renders_after_settle() {
    let mut engine = engine(r#"<ul tr-each="users" tr-each-key="id"><li>{{name}}</li></ul>"#);
    engine.scan();
    let root = root(&engine);

    engine.set_binding_data(
        root,
        scope_from_json(json!({"users": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]})),
    );
    engine.settle().await.unwrap();

    assert_eq!(
        markup(&engine),
        r#"<ul tr-each="users" tr-each-key="id"><li tr-key="1">A</li><li tr-key="2">B</li></ul>"#
    );
    let doc = engine.document().lock();
    assert_eq!(doc.text_content(doc.root()), "AB");
}

/// Test that the animation frame source also drains everything.
#[tokio::test]
async fn default_frames_drain_the_queue() {
    let document = Document::parse("<p>{{greeting}}</p>").unwrap();
    let mut engine = Engine::new(document, EngineConfig::default()).unwrap();
    engine.scan();
    let root = engine.document().lock().root();
    engine.set_binding_data(root, scope_from_json(json!({"greeting": "hello"})));

    engine.settle().await.unwrap();
    assert_eq!(markup(&engine), "<p>hello</p>");
    assert!(engine.queue().is_empty());
}

/// Test keyed reuse, removal and creation across two data updates.
#[tokio::test]
async fn reconciliation_reuses_keyed_rows() {
    let mut engine = engine(r#"<ul tr-each="items" tr-each-key="id"><li>{{label}}</li></ul>"#);
    engine.scan();
    let root = root(&engine);

    engine.set_binding_data(
        root,
        scope_from_json(json!({"items": [{"id": 1, "label": "A"}, {"id": 2, "label": "B"}]})),
    );
    engine.settle().await.unwrap();
    let ul = engine.document().lock().elements_by_tag(root, "ul")[0];
    let rows_before: Vec<_> = engine.document().lock().children(ul).to_vec();

    engine.set_binding_data(
        root,
        scope_from_json(json!({"items": [{"id": 2, "label": "B"}, {"id": 3, "label": "C"}]})),
    );
    engine.settle().await.unwrap();
    let rows_after: Vec<_> = engine.document().lock().children(ul).to_vec();

    assert_eq!(rows_after.len(), 2);
    assert_eq!(rows_after[0], rows_before[1]);
    assert!(!engine.document().lock().contains(rows_before[0]));
    assert_eq!(
        markup(&engine),
        r#"<ul tr-each="items" tr-each-key="id"><li tr-key="2">B</li><li tr-key="3">C</li></ul>"#
    );

    // A third pass with the same data queues nothing.
    engine.evaluate(root);
    assert!(engine.queue().is_empty());
}

/// Test that nested repetitions inherit item data through the list.
#[tokio::test]
async fn nested_lists_see_outer_items() {
    let mut engine = engine(
        r#"<section tr-each="groups" tr-each-key="name"><h2>{{name}}</h2><ol tr-each="members" tr-each-arg="m"><li>{{m}}@{{name}}</li></ol></section>"#,
    );
    engine.scan();
    let root = root(&engine);
    engine.set_binding_data(
        root,
        scope_from_json(json!({"groups": [
            {"name": "x", "members": ["a", "b"]},
            {"name": "y", "members": ["c"]}
        ]})),
    );
    engine.settle().await.unwrap();

    let doc = engine.document().lock();
    assert_eq!(doc.text_content(doc.root()), "xa@xb@xyc@y");
}

/// Test that hiding and showing twice restores the initial display.
#[tokio::test]
async fn visibility_round_trip() {
    let mut engine = engine(r#"<div style="display: grid" tr-if="open">{{n}}</div>"#);
    engine.scan();
    let root = root(&engine);

    for _ in 0..2 {
        engine.set_binding_data(root, scope_from_json(json!({"open": null, "n": 1})));
        engine.settle().await.unwrap();
        let hidden = markup(&engine);
        assert!(hidden.starts_with(r#"<div style="display: none;" tr-if="open" tr-hidden="">"#), "{hidden}");
        assert_eq!(hidden.matches("tr-hidden").count(), 1);

        engine.set_binding_data(root, scope_from_json(json!({"open": "yes", "n": 1})));
        engine.settle().await.unwrap();
        assert_eq!(markup(&engine), r#"<div style="display: grid;" tr-if="open">1</div>"#);
    }
}

/// Test that an element without inline display loses the style entirely.
#[tokio::test]
async fn visibility_removes_added_style() {
    let mut engine = engine(r#"<span tr-if="on">x</span>"#);
    engine.scan();
    let root = root(&engine);

    engine.set_binding_data(root, scope_from_json(json!({"on": false})));
    engine.settle().await.unwrap();
    engine.set_binding_data(root, scope_from_json(json!({"on": true})));
    engine.settle().await.unwrap();
    assert_eq!(markup(&engine), r#"<span tr-if="on">x</span>"#);
}

/// Test the join policy end to end: removal for attributes, empty text.
#[tokio::test]
async fn blank_values_remove_attributes_and_vanish_in_text() {
    let mut engine = engine(r#"<a title="{{t}}" href="/{{t}}">[{{t}}]</a>"#);
    engine.scan();
    let root = root(&engine);

    for blank in [json!(null), json!(false)] {
        engine.set_binding_data(root, scope_from_json(json!({ "t": blank })));
        engine.settle().await.unwrap();
        assert_eq!(markup(&engine), r#"<a href="/">[]</a>"#);
    }

    engine.set_binding_data(root, scope_from_json(json!({"t": 0})));
    engine.settle().await.unwrap();
    // The removed attribute comes back after the ones that stayed.
    assert_eq!(markup(&engine), r#"<a href="/0" title="0">[0]</a>"#);
}

/// Test that writes from outside the engine are fed back into the tree.
#[tokio::test]
async fn external_writes_are_observed() {
    let mut engine = engine(r#"<div><p class="a">{{x}}</p></div>"#);
    engine.scan();
    let root = root(&engine);
    engine.set_binding_data(root, scope_from_json(json!({"x": 1, "y": 2})));
    engine.settle().await.unwrap();
    assert_eq!(engine.process_mutations(), 0);

    let (div, p) = {
        let doc = engine.document().lock();
        let div = doc.elements_by_tag(root, "div")[0];
        (div, doc.elements_by_tag(root, "p")[0])
    };
    {
        let mut doc = engine.document().lock();
        doc.set_attribute(p, "class", "c{{y}}").unwrap();
        let span = doc.create_element("span");
        let text = doc.create_text("{{x}}+{{y}}");
        doc.append_child(span, text).unwrap();
        doc.append_child(div, span).unwrap();
    }
    assert!(engine.process_mutations() >= 2);
    engine.settle().await.unwrap();

    assert_eq!(markup(&engine), r#"<div><p class="c2">1</p><span>1+2</span></div>"#);
    assert_eq!(engine.process_mutations(), 0);
}

/// Test that a bind declaration evaluates against the parent's data.
#[tokio::test]
async fn bind_declarations_are_scoped_to_the_parent() {
    let mut engine = engine(r#"<div tr-bind="{ who: user.name, n: count + 1 }"><b>{{who}}</b><i>{{n}}</i></div>"#);
    let root = root(&engine);
    engine.set_binding_data(root, scope_from_json(json!({"user": {"name": "Ann"}, "count": 4})));
    engine.settle().await.unwrap();
    assert_eq!(
        markup(&engine),
        r#"<div tr-bind="{ who: user.name, n: count + 1 }"><b>Ann</b><i>5</i></div>"#
    );
}

/// Test that the alternate prefix is recognised.
#[tokio::test]
async fn alternate_prefix_directives() {
    let mut engine = engine(r#"<ul data-tr-each="xs" data-tr-each-arg="x"><li>{{x}}</li></ul>"#);
    engine.scan();
    let root = root(&engine);
    engine.set_binding_data(root, scope_from_json(json!({"xs": [1, 2]})));
    engine.settle().await.unwrap();
    let doc = engine.document().lock();
    assert_eq!(doc.text_content(doc.root()), "12");
}

/// Test priority ordering on a live runtime.
#[tokio::test]
async fn queue_orders_by_priority() {
    let document = Arc::new(Mutex::new(Document::new()));
    let config = QueueConfig {
        frame: FrameSource::Immediate,
        ..QueueConfig::default()
    };
    let queue = MutationQueue::new(document, &config);
    let log = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = [("first", 1), ("urgent", 10), ("second", 1)]
        .into_iter()
        .map(|(name, priority)| {
            let log = Arc::clone(&log);
            queue.enqueue(
                Mutation::new(move |_| {
                    log.lock().push(name);
                    Ok(())
                })
                .with_priority(Priority(priority)),
            )
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["urgent", "first", "second"]);
}

/// Test that overflow rejects the oldest pending mutation.
#[tokio::test]
async fn queue_overflow_rejects_oldest() {
    let document = Arc::new(Mutex::new(Document::new()));
    let config = QueueConfig {
        capacity: 2,
        frame: FrameSource::Immediate,
        ..QueueConfig::default()
    };
    let queue = MutationQueue::new(document, &config);

    let oldest = queue.enqueue(Mutation::new(|_| Ok(())));
    let oldest_id = oldest.id();
    let second = queue.enqueue(Mutation::new(|_| Ok(())));
    let third = queue.enqueue(Mutation::new(|_| Ok(())));

    assert_eq!(oldest.await, Err(QueueError::Overflow(oldest_id)));
    assert_eq!(second.await, Ok(()));
    assert_eq!(third.await, Ok(()));
}

/// Test that the evaluator never panics and shares compilations.
#[test]
fn evaluator_is_total_and_cached() {
    let evaluator = Evaluator::new();
    let mut scope = Scope::new();
    scope.insert("a".to_string(), Value::from(1.0));

    for source in ["", "a +", "constructor", "this", "(((", "a.b.c.d", "window.alert(1)"] {
        let value = evaluator.evaluate(source, &scope);
        assert!(matches!(value, Value::Null | Value::Undefined), "{source:?} gave {value:?}");
    }

    evaluator.clear_cache();
    assert_eq!(evaluator.evaluate("a * 2", &scope), Value::from(2.0));
    scope.insert("a".to_string(), Value::from(21.0));
    assert_eq!(evaluator.evaluate("a * 2", &scope), Value::from(42.0));
    assert_eq!(evaluator.cache_len(), 1);
}

/// Test that the diagnostics macros resolve by path outside the crate.
#[test]
fn dev_macros_resolve_by_path() {
    use trellis_core::{dev_debug, dev_warn};

    trellis_core::log::set_dev_mode(true);
    dev_warn!(source = "a +", "expression evaluation failed");
    dev_debug!(count = 3, "mutation batch drained");
    trellis_core::dev_info!("engine created");
    trellis_core::log::set_dev_mode(false);
}
