// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end behavior of the engine, observed through the recording host.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use ravel_core::element::{Component, Element, Props};
use ravel_core::engine::{EngineConfig, RootOptions};
use ravel_core::error::{EngineError, RenderError};
use ravel_core::hooks::{ExternalStore, Setter};
use ravel_core::lane::{EventPriority, Lanes};
use ravel_core::time::Duration;
use ravel_core::wakeable::Resource;

use crate::{Harness, HostOp, NodeId, TestHost};

type Slot<T> = Rc<RefCell<Option<T>>>;

fn div(children: Vec<Element>) -> Element {
    Element::host("div", Props::new(), children)
}

/// A component showing a counter, handing its setter out through `slot`.
fn counter(slot: &Slot<Setter<i64>>) -> Component {
    let slot = slot.clone();
    Component::new("Counter", move |cx, props| {
        let start = props.int("start").unwrap_or(0);
        let (n, set_n) = cx.use_state(|| start);
        *slot.borrow_mut() = Some(set_n);
        Ok(vec![div(vec![Element::text(format!("{n}"))])])
    })
}

fn setter<T>(slot: &Slot<T>) -> T
where
    T: Clone,
{
    slot.borrow().clone().unwrap()
}

#[test]
fn mounting_one_element_creates_and_attaches_it_once() {
    let mut h = Harness::new();
    h.render_sync(div(vec![])).unwrap();
    assert_eq!(
        h.take_ops(),
        vec![
            HostOp::Create {
                node: NodeId(1),
                tag: "div"
            },
            HostOp::Append {
                parent: NodeId::CONTAINER,
                child: NodeId(1)
            },
        ]
    );
    assert_eq!(h.commits(), 1);
}

#[test]
fn changing_a_text_leaf_updates_only_that_node() {
    let mut h = Harness::new();
    h.render_sync(div(vec![Element::text("a"), Element::text("x")])).unwrap();
    h.take_ops();
    h.render_sync(div(vec![Element::text("b"), Element::text("x")])).unwrap();
    assert_eq!(
        h.take_ops(),
        vec![HostOp::UpdateText {
            node: NodeId(1),
            text: "b".into()
        }]
    );
    assert_eq!(h.tree(), "<div>bx</div>");
}

#[test]
fn synchronous_updates_in_one_scope_commit_once() {
    let mut h = Harness::new();
    let slot = Slot::default();
    let c = counter(&slot);
    h.render_sync(c.element(Props::new())).unwrap();
    let set_n = setter(&slot);
    h.engine_mut()
        .flush_sync(|_| {
            set_n.update(|n| n + 1);
            set_n.update(|n| n + 10);
        })
        .unwrap();
    assert_eq!(h.commits(), 2);
    assert_eq!(h.tree(), "<div>11</div>");

    let mut fresh = Harness::new();
    fresh
        .render_sync(c.element(Props::new().with("start", 11)))
        .unwrap();
    assert_eq!(fresh.tree(), h.tree(), "same result as rendering the final state");
}

#[test]
fn concurrent_renders_mutate_nothing_before_their_commit() {
    let mut h = Harness::with_config(EngineConfig {
        time_slice_default_updates: true,
        ..EngineConfig::standard()
    });
    h.host_loop().set_auto_advance(Duration::from_micros(300));
    let items = (0..30_i64)
        .map(|i| Element::host("li", Props::new().with("n", i), vec![]))
        .collect();
    h.render(Element::host("ul", Props::new(), items)).unwrap();

    assert!(h.step().unwrap());
    assert!(h.host().mutations().is_empty(), "no commit after one slice");
    assert_eq!(h.tree(), "");

    h.run_until_idle().unwrap();
    assert_eq!(h.commits(), 1);
    assert_eq!(h.host().mutations().len(), 1, "the list is attached in one append");
    assert_eq!(h.host().mutations_outside_commit(), 0);
}

#[test]
fn unchanged_children_are_not_rendered_again() {
    let mut h = Harness::new();
    let renders = Rc::new(Cell::new(0_u32));
    let counted = renders.clone();
    let child = Component::new("Child", move |_, _| {
        counted.set(counted.get() + 1);
        Ok(vec![Element::text("static")])
    })
    .element(Props::new());
    let slot: Slot<Setter<i64>> = Slot::default();
    let out = slot.clone();
    let parent = Component::new("Parent", move |cx, _| {
        let (n, set_n) = cx.use_state(|| 0_i64);
        *out.borrow_mut() = Some(set_n);
        Ok(vec![Element::text(format!("{n}")), child.clone()])
    });

    h.render_sync(parent.element(Props::new())).unwrap();
    let set_n = setter(&slot);
    for n in 1..=3 {
        h.engine_mut().flush_sync(|_| set_n.set(n)).unwrap();
    }
    assert_eq!(h.tree(), "3static");
    assert_eq!(renders.get(), 1);
}

#[test]
fn keyed_reorders_only_move_nodes() {
    let mut h = Harness::new();
    let list = |keys: &[&str]| {
        let items = keys
            .iter()
            .map(|k| Element::host("li", Props::new(), vec![Element::text(*k)]).with_key(*k))
            .collect();
        Element::host("ul", Props::new(), items)
    };
    h.render_sync(list(&["a", "b", "c", "d", "e"])).unwrap();
    let created = h.host().node_count();
    h.take_ops();

    h.render_sync(list(&["e", "a", "b", "c", "d"])).unwrap();
    let ops = h.take_ops();
    assert!(!ops.is_empty());
    assert!(
        ops.iter()
            .all(|op| matches!(op, HostOp::Insert { .. } | HostOp::Append { .. })),
        "{ops:?}"
    );
    assert_eq!(h.host().node_count(), created);
    assert_eq!(
        h.tree(),
        "<ul><li>e</li><li>a</li><li>b</li><li>c</li><li>d</li></ul>"
    );

    h.render_sync(list(&["d", "c", "b", "a", "e"])).unwrap();
    assert_eq!(
        h.tree(),
        "<ul><li>d</li><li>c</li><li>b</li><li>a</li><li>e</li></ul>"
    );
    assert_eq!(h.host().node_count(), created);
}

#[test]
fn effect_cleanups_run_before_new_effects() {
    let mut h = Harness::new();
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let logged = |name: &'static str| {
        let log = log.clone();
        Component::new(name, move |cx, props| {
            let n = props.int("n").unwrap_or(0);
            let log = log.clone();
            cx.use_effect(Some(vec![n.into()]), move || {
                log.borrow_mut().push(format!("+{name}{n}"));
                let log = log.clone();
                Ok(ravel_core::hooks::cleanup(move || {
                    log.borrow_mut().push(format!("-{name}{n}"));
                }))
            });
            Ok(vec![])
        })
    };
    let (a, b) = (logged("a"), logged("b"));
    let app = |n: i64| {
        div(vec![
            a.element(Props::new().with("n", n)),
            b.element(Props::new().with("n", n)),
        ])
    };
    h.render_sync(app(0)).unwrap();
    log.borrow_mut().clear();
    h.render_sync(app(1)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(*log.borrow(), ["-a0", "-b0", "+a1", "+b1"]);
}

#[test]
fn idle_updates_commit_after_synchronous_ones_without_reapplying_them() {
    let mut h = Harness::new();
    let rendered: Rc<RefCell<Vec<String>>> = Rc::default();
    let applied = Rc::new(Cell::new(0_u32));
    let slot: Slot<(Setter<i64>, Setter<i64>)> = Slot::default();
    let (out, log) = (slot.clone(), rendered.clone());
    let pair = Component::new("Pair", move |cx, _| {
        let (a, set_a) = cx.use_state(|| 0_i64);
        let (b, set_b) = cx.use_state(|| 0_i64);
        *out.borrow_mut() = Some((set_a, set_b));
        let text = format!("{a}/{b}");
        log.borrow_mut().push(text.clone());
        Ok(vec![Element::text(text)])
    });
    h.render_sync(pair.element(Props::new())).unwrap();
    let (set_a, set_b) = setter(&slot);

    h.engine_mut()
        .with_priority(EventPriority::Idle, |_| set_b.set(1));
    let count = applied.clone();
    h.engine_mut()
        .flush_sync(|_| {
            set_a.update(move |n| {
                count.set(count.get() + 1);
                n + 1
            });
        })
        .unwrap();
    assert_eq!(h.tree(), "1/0", "the synchronous update commits alone");
    assert_eq!(h.commits(), 2);

    h.run_until_idle().unwrap();
    assert_eq!(h.tree(), "1/1");
    assert_eq!(h.commits(), 3);
    assert_eq!(*rendered.borrow(), ["0/0", "1/0", "1/1"]);
    assert_eq!(applied.get(), 1);
}

#[test]
fn a_suspending_transition_keeps_the_old_content_until_it_resolves() {
    let mut h = Harness::new();
    let resource: Resource<Rc<str>> = Resource::pending();
    let source = resource.clone();
    let lazy = Component::new("Lazy", move |_, _| Ok(vec![Element::text(source.read()?)]));
    let page = |content: Element| {
        Element::suspense(vec![Element::text("loading")], vec![div(vec![content])])
    };

    h.render_sync(page(Element::text("home"))).unwrap();
    assert_eq!(h.tree(), "<div>home</div>");
    h.take_ops();

    h.render_transition(page(lazy.element(Props::new()))).unwrap();
    h.run_until_idle().unwrap();
    h.advance(Duration::from_millis(200)).unwrap();
    assert_eq!(h.commits(), 1, "neither the fallback nor the content commits");
    assert_eq!(h.tree(), "<div>home</div>");

    resource.resolve("profile".into());
    h.run_until_idle().unwrap();
    assert_eq!(h.commits(), 2);
    assert_eq!(h.tree(), "<div>profile</div>");
    let ops = h.take_ops();
    assert!(
        !ops.iter().any(|op| matches!(op, HostOp::Hide { .. })),
        "the old content was never hidden: {ops:?}"
    );
}

#[test]
fn a_suspended_mount_shows_the_fallback_then_the_content() {
    let mut h = Harness::new();
    let resource: Resource<Rc<str>> = Resource::pending();
    let source = resource.clone();
    let lazy = Component::new("Lazy", move |_, _| Ok(vec![Element::text(source.read()?)]));
    h.render_sync(Element::suspense(
        vec![Element::text("loading")],
        vec![lazy.element(Props::new())],
    ))
    .unwrap();
    assert_eq!(h.tree(), "loading");

    resource.resolve("ready".into());
    h.run_until_idle().unwrap();
    assert_eq!(h.tree(), "ready");
}

#[test]
fn runaway_layout_updates_stop_at_the_nested_limit() {
    let mut h = Harness::new();
    let runaway = Component::new("Runaway", |cx, _| {
        let (n, set_n) = cx.use_state(|| 0_u32);
        cx.use_layout_effect(None, move || {
            set_n.update(|n| n + 1);
            Ok(None)
        });
        Ok(vec![Element::text(format!("{n}"))])
    });
    let root = h.root();
    let result = h.render_sync(runaway.element(Props::new()));
    assert!(
        matches!(result, Err(EngineError::MaximumUpdateDepthExceeded { root: r }) if r == root),
        "{result:?}"
    );
    assert_eq!(h.engine().pending_lanes(root), Lanes::NONE);
    assert!(h.commits() > 50);
}

#[test]
fn layout_effect_errors_are_caught_by_the_nearest_boundary() {
    let mut h = Harness::new();
    let caught = Rc::new(Cell::new(0_u32));
    let faulty = Component::new("Faulty", |cx, _| {
        cx.use_layout_effect(Some(vec![]), || Err(RenderError::msg("effect failed")));
        Ok(vec![Element::text("content")])
    });
    let seen = caught.clone();
    let tree = Element::error_boundary(
        |error| vec![Element::text(format!("recovered: {}", error.error))],
        vec![faulty.element(Props::new())],
    )
    .on_error(move |_| seen.set(seen.get() + 1));
    h.render_sync(tree).unwrap();
    assert_eq!(h.tree(), "recovered: effect failed");
    assert_eq!(caught.get(), 1);
}

#[test]
fn immutable_nodes_are_replaced_with_their_children_moved_over() {
    let host = TestHost::new().with_immutable_tags(&["img"]);
    let mut h = Harness::build(host, EngineConfig::standard(), RootOptions::new());
    let image = |src: &str| {
        div(vec![Element::host(
            "img",
            Props::new().with("src", src),
            vec![Element::text("alt")],
        )])
    };
    h.render_sync(image("a")).unwrap();
    h.take_ops();

    h.render_sync(image("b")).unwrap();
    assert_eq!(
        h.take_ops(),
        vec![
            HostOp::Create {
                node: NodeId(4),
                tag: "img"
            },
            HostOp::Append {
                parent: NodeId(4),
                child: NodeId(1)
            },
            HostOp::Insert {
                parent: NodeId(3),
                child: NodeId(4),
                before: NodeId(2)
            },
            HostOp::Remove {
                parent: NodeId(3),
                child: NodeId(2)
            },
        ]
    );
    assert_eq!(h.tree(), "<div><img src=b>alt</img></div>");
}

#[test]
fn measure_callbacks_see_the_box_before_and_after_the_commit() {
    let mut h = Harness::new();
    let widths: Rc<RefCell<Vec<(f64, f64)>>> = Rc::default();
    let boxed = |width: i64| {
        let widths = widths.clone();
        Element::host("div", Props::new().with("width", width), vec![])
            .on_measure(move |before, after| widths.borrow_mut().push((before.width(), after.width())))
    };
    h.render_sync(boxed(10)).unwrap();
    h.render_sync(boxed(20)).unwrap();
    assert_eq!(*widths.borrow(), [(0.0, 10.0), (10.0, 20.0)]);
}

#[test]
fn refs_attach_on_mount_and_detach_on_unmount() {
    let mut h = Harness::new();
    let seen: Rc<RefCell<Vec<Option<NodeId>>>> = Rc::default();
    let record = seen.clone();
    let element = div(vec![]).with_ref(move |node| {
        record
            .borrow_mut()
            .push(node.and_then(|n| n.downcast_ref::<NodeId>().copied()));
    });
    h.render_sync(element).unwrap();
    assert_eq!(*seen.borrow(), [Some(NodeId(1))]);
    h.unmount().unwrap();
    assert_eq!(*seen.borrow(), [Some(NodeId(1)), None]);
    assert_eq!(h.tree(), "");
}

#[test]
fn external_store_changes_rerender_subscribers() {
    let mut h = Harness::new();
    let store = ExternalStore::new(1_i64);
    let source = store.clone();
    let reader = Component::new("Reader", move |cx, _| {
        let value = cx.use_store(&source);
        Ok(vec![Element::text(format!("{value}"))])
    });
    h.render_sync(reader.element(Props::new())).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(store.subscriber_count(), 1);

    store.set(2);
    h.flush_updates().unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.tree(), "2");

    h.unmount().unwrap();
    assert_eq!(store.subscriber_count(), 0);
}

#[test]
fn a_store_written_mid_render_is_read_consistently() {
    let mut h = Harness::new();
    h.host_loop().set_auto_advance(Duration::from_micros(300));
    let store = ExternalStore::new(1_i64);
    let reads: Rc<RefCell<Vec<i64>>> = Rc::default();
    let (source, log) = (store.clone(), reads.clone());
    let reader = Component::new("Reader", move |cx, _| {
        let value = cx.use_store(&source);
        log.borrow_mut().push(value);
        Ok(vec![Element::text(format!("{value}"))])
    });
    let mut items = vec![reader.element(Props::new())];
    items.extend((0..30).map(|_| Element::host("li", Props::new(), vec![])));
    items.push(reader.element(Props::new()));
    h.render_transition(Element::host("ul", Props::new(), items))
        .unwrap();

    assert!(h.step().unwrap());
    assert_eq!(h.commits(), 0, "the render yielded");
    store.set(2);
    h.run_until_idle().unwrap();

    assert_eq!(reads.borrow()[0], 1, "the first reader saw the old value");
    assert_eq!(h.commits(), 1);
    assert_eq!(h.tree(), format!("<ul>2{}2</ul>", "<li></li>".repeat(30)));
}

#[test]
fn a_synchronous_update_interrupts_a_time_sliced_render() {
    let mut h = Harness::with_config(EngineConfig {
        time_slice_default_updates: true,
        ..EngineConfig::standard()
    });
    let slot: Slot<Setter<i64>> = Slot::default();
    let rendered: Rc<RefCell<Vec<i64>>> = Rc::default();
    let (out, log) = (slot.clone(), rendered.clone());
    let list = Component::new("List", move |cx, _| {
        let (n, set_n) = cx.use_state(|| 0_i64);
        *out.borrow_mut() = Some(set_n);
        log.borrow_mut().push(n);
        let items = (0..30)
            .map(|_| {
                Element::host("li", Props::new(), vec![Element::text(format!("{n}"))])
            })
            .collect();
        Ok(vec![Element::host("ul", Props::new(), items)])
    });
    let expected = |n: i64| format!("<ul>{}</ul>", format!("<li>{n}</li>").repeat(30));
    h.render_sync(list.element(Props::new())).unwrap();
    let set_n = setter(&slot);

    h.host_loop().set_auto_advance(Duration::from_micros(300));
    set_n.set(1);
    h.flush_updates().unwrap();
    assert!(h.step().unwrap());
    assert_eq!(h.commits(), 1, "the default render yielded");
    assert_eq!(h.tree(), expected(0));

    h.engine_mut().flush_sync(|_| set_n.set(100)).unwrap();
    assert_eq!(h.commits(), 2);
    assert_eq!(h.tree(), expected(100), "the partial render was thrown away");

    h.run_until_idle().unwrap();
    assert_eq!(h.tree(), expected(100), "the skipped update replays under the later one");
    let rendered = rendered.borrow();
    assert_eq!(rendered[..3], [0, 1, 100]);
    assert!(!rendered[2..].contains(&1), "{rendered:?}");
}

#[test]
fn runaway_passive_updates_stop_at_the_nested_limit() {
    let mut h = Harness::new();
    let runaway = Component::new("Runaway", |cx, _| {
        let (n, set_n) = cx.use_state(|| 0_u32);
        cx.use_effect(None, move || {
            set_n.update(|n| n + 1);
            Ok(None)
        });
        Ok(vec![Element::text(format!("{n}"))])
    });
    let root = h.root();
    h.render_sync(runaway.element(Props::new())).unwrap();
    let result = h.run_until_idle();
    assert!(
        matches!(result, Err(EngineError::MaximumUpdateDepthExceeded { root: r }) if r == root),
        "{result:?}"
    );
    assert!(h.commits() > 50);
    assert_eq!(h.engine().pending_lanes(root), Lanes::NONE);
    h.run_until_idle().unwrap();
}

#[test]
fn an_error_that_goes_away_on_retry_is_reported_as_recoverable() {
    let recovered: Rc<RefCell<Vec<String>>> = Rc::default();
    let caught = Rc::new(Cell::new(0_u32));
    let (log, seen) = (recovered.clone(), caught.clone());
    let options = RootOptions::new()
        .on_recoverable_error(move |error| {
            log.borrow_mut().push(format!("{}", error.error));
        })
        .on_caught_error(move |_| seen.set(seen.get() + 1));
    let mut h = Harness::build(TestHost::new(), EngineConfig::standard(), options);
    let failed = Rc::new(Cell::new(false));
    let flaky = Component::new("Flaky", move |_, _| {
        if !failed.replace(true) {
            return Err(RenderError::msg("flaky").into());
        }
        Ok(vec![Element::text("steady")])
    });

    h.render(flaky.element(Props::new())).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.tree(), "steady");
    assert_eq!(*recovered.borrow(), ["flaky"]);
    assert_eq!(caught.get(), 0);
}

#[test]
fn boundary_catches_are_reported_to_the_root() {
    let caught: Rc<RefCell<Vec<String>>> = Rc::default();
    let recovered = Rc::new(Cell::new(0_u32));
    let (log, seen) = (caught.clone(), recovered.clone());
    let options = RootOptions::new()
        .on_caught_error(move |error| {
            log.borrow_mut().push(format!("{}", error.error));
        })
        .on_recoverable_error(move |_| seen.set(seen.get() + 1));
    let mut h = Harness::build(TestHost::new(), EngineConfig::standard(), options);
    let bomb = Component::new("Bomb", |_, _| Err(RenderError::msg("boom").into()));
    h.render_sync(Element::error_boundary(
        |_| vec![Element::text("fallback")],
        vec![bomb.element(Props::new())],
    ))
    .unwrap();
    assert_eq!(h.tree(), "fallback");
    assert_eq!(*caught.borrow(), ["boom"]);
    assert_eq!(recovered.get(), 0);
}

#[test]
fn revealing_a_nested_fallback_waits_out_the_fallback_throttle() {
    let mut h = Harness::new();
    let outer: Resource<Rc<str>> = Resource::pending();
    let inner: Resource<Rc<str>> = Resource::pending();
    let reader = |name: &'static str, resource: &Resource<Rc<str>>| {
        let resource = resource.clone();
        Component::new(name, move |_, _| Ok(vec![Element::text(resource.read()?)]))
    };
    let tree = Element::suspense(
        vec![Element::text("loading outer")],
        vec![
            reader("Outer", &outer).element(Props::new()),
            Element::suspense(
                vec![Element::text("loading inner")],
                vec![reader("Inner", &inner).element(Props::new())],
            ),
        ],
    );
    h.render_sync(tree).unwrap();
    assert_eq!(h.tree(), "loading outer");

    h.advance(Duration::from_millis(100)).unwrap();
    outer.resolve("a".into());
    h.flush_updates().unwrap();
    h.drain_callbacks().unwrap();
    assert_eq!(h.commits(), 1, "the retry is held back");
    assert_eq!(h.tree(), "loading outer");

    h.advance(Duration::from_millis(399)).unwrap();
    assert_eq!(h.commits(), 1, "still inside the throttle window");

    h.advance(Duration::from_millis(1)).unwrap();
    assert_eq!(h.commits(), 2, "committed 500ms after the first fallback");
    assert_eq!(h.tree(), "aloading inner");
}
