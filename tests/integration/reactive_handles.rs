#![allow(missing_docs)]

use reflejo::schema::*;
use reflejo::{GraphError, Patch, Result, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn schema() -> Schema {
    Schema {
        types: vec![
            TypeDecl::new("user")
                .prop("name")
                .edge(
                    EdgeDecl::new("posts", "post")
                        .reverse("author")
                        .index(&["published"]),
                ),
            TypeDecl::new("post").prop("title").prop("published"),
        ],
    }
}

#[test]
fn signal_effect_runs_immediately_then_once_per_change() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("name", "ada"))?;
    let log: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let sub = user.prop("name").use_(move |new, old| {
        sink.borrow_mut().push((new.clone(), old.clone()));
        None
    });
    assert_eq!(*log.borrow(), vec![("ada".into(), Value::Nil)]);

    user.prop("name").set("grace")?;
    user.prop("name").set("grace")?; // equal write: no event
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(log.borrow()[1], ("grace".into(), "ada".into()));

    sub.cancel();
    user.prop("name").set("lin")?;
    assert_eq!(log.borrow().len(), 2);
    Ok(())
}

#[test]
fn signal_cleanup_runs_before_next_effect_and_on_cancel() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("name", "a"))?;
    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let sub = user.prop("name").use_(move |new, _| {
        let label = format!("effect:{new}");
        sink.borrow_mut().push(label.clone());
        let sink = sink.clone();
        Some(Box::new(move || {
            sink.borrow_mut().push(format!("cleanup-after:{label}"));
        }) as Box<dyn FnOnce()>)
    });

    user.prop("name").set("b")?;
    sub.cancel();
    let events = events.borrow();
    assert_eq!(
        *events,
        vec![
            "effect:\"a\"".to_string(),
            "cleanup-after:effect:\"a\"".to_string(),
            "effect:\"b\"".to_string(),
            "cleanup-after:effect:\"b\"".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn unknown_property_signals_read_nil_and_reject_writes() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let ghost = user.prop("ghost");
    assert_eq!(ghost.get(), Value::Nil);
    assert!(matches!(
        ghost.set("x"),
        Err(GraphError::UnknownProperty(_))
    ));
    let fired = Rc::new(RefCell::new(0));
    let f = fired.clone();
    let sub = ghost.use_(move |new, old| {
        assert_eq!((new, old), (&Value::Nil, &Value::Nil));
        *f.borrow_mut() += 1;
        None
    });
    assert_eq!(*fired.borrow(), 1, "fires once, never again");
    sub.cancel();
    Ok(())
}

#[test]
fn edge_subscriptions_deliver_the_other_endpoint() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;

    let linked = Rc::new(RefCell::new(Vec::new()));
    let unlinked = Rc::new(RefCell::new(Vec::new()));
    let l = linked.clone();
    let u = unlinked.clone();
    let posts = user.edge("posts")?;
    let _on_link = posts.on_link(move |other| l.borrow_mut().push(other.id()));
    let _on_unlink = posts.on_unlink(move |other| u.borrow_mut().push(other.id()));

    // Reverse-side subscription fires for the same physical link.
    let authors = Rc::new(RefCell::new(Vec::new()));
    let a = authors.clone();
    let _rev = post.edge("author")?.on_link(move |other| a.borrow_mut().push(other.id()));

    graph.link(user.id(), "posts", post.id())?;
    assert_eq!(*linked.borrow(), vec![post.id()]);
    assert_eq!(*authors.borrow(), vec![user.id()], "reverse side sees the source");

    // A duplicate link is a no-op and must not re-fire.
    graph.link(user.id(), "posts", post.id())?;
    assert_eq!(linked.borrow().len(), 1);

    graph.unlink(user.id(), "posts", post.id())?;
    assert_eq!(*unlinked.borrow(), vec![post.id()]);
    Ok(())
}

#[test]
fn subscriptions_are_shared_across_handle_instances() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;

    let fired = Rc::new(RefCell::new(0));
    let f = fired.clone();
    let _sub = user.edge("posts")?.on_link(move |_| *f.borrow_mut() += 1);

    // A different handle instance over the same (id, edge) drives the event.
    user.edge("posts")?.link(post.id())?;
    assert_eq!(*fired.borrow(), 1);
    Ok(())
}

#[test]
fn each_covers_current_and_future_targets_with_cleanup() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p1 = graph.insert("post", Patch::new().with("title", "a"))?;
    graph.link(user.id(), "posts", p1.id())?;

    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let sub = user.edge("posts")?.each(move |node| {
        let id = node.id();
        sink.borrow_mut().push(format!("in:{id}"));
        let sink = sink.clone();
        Some(Box::new(move || {
            sink.borrow_mut().push(format!("out:{id}"));
        }) as Box<dyn FnOnce()>)
    });
    assert_eq!(*events.borrow(), vec![format!("in:{}", p1.id())]);

    let p2 = graph.insert("post", Patch::new().with("title", "b"))?;
    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(events.borrow().len(), 2);

    graph.unlink(user.id(), "posts", p1.id())?;
    assert_eq!(events.borrow().last().unwrap(), &format!("out:{}", p1.id()));

    sub.cancel();
    assert_eq!(
        events.borrow().last().unwrap(),
        &format!("out:{}", p2.id()),
        "cancel tears down remaining targets"
    );
    Ok(())
}

#[test]
fn filtered_each_only_sees_matching_links() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let filtered = user
        .edge("posts")?
        .filter(vec![Filter::eq("published", true)], None)?;
    let _sub = filtered.each(move |node| {
        s.borrow_mut().push(node.id());
        None
    });

    let yes = graph.insert("post", Patch::new().with("published", true))?;
    let no = graph.insert("post", Patch::new().with("published", false))?;
    graph.link(user.id(), "posts", yes.id())?;
    graph.link(user.id(), "posts", no.id())?;
    assert_eq!(*seen.borrow(), vec![yes.id()]);
    Ok(())
}

#[test]
fn filtered_handles_need_a_covering_index() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let err = user
        .edge("posts")?
        .filter(vec![Filter::eq("title", "a")], None)
        .unwrap_err();
    assert!(err.to_string().starts_with("No index covers query ["));

    let ok = user
        .edge("posts")?
        .filter(vec![Filter::eq("published", true)], None)?;
    assert_eq!(ok.count(), 0);
    Ok(())
}

#[test]
fn filtered_count_is_live() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let filtered = user
        .edge("posts")?
        .filter(vec![Filter::eq("published", true)], None)?;

    let p1 = graph.insert("post", Patch::new().with("published", true))?;
    let p2 = graph.insert("post", Patch::new().with("published", false))?;
    graph.link(user.id(), "posts", p1.id())?;
    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(filtered.count(), 1);
    assert_eq!(user.edge("posts")?.count(), 2, "unfiltered sees both");

    p2.prop("published").set(true)?;
    assert_eq!(filtered.count(), 2, "re-keyed entry joins the window");
    Ok(())
}

#[test]
fn cancelling_mid_delivery_does_not_skip_the_in_flight_event() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;

    let second_fired = Rc::new(RefCell::new(0));
    let slot: Rc<RefCell<Option<reflejo::Subscription>>> = Rc::new(RefCell::new(None));
    let posts = user.edge("posts")?;

    let slot_for_first = slot.clone();
    let _first = posts.on_link(move |_| {
        if let Some(sub) = slot_for_first.borrow_mut().take() {
            sub.cancel();
        }
    });
    let f = second_fired.clone();
    let second = posts.on_link(move |_| *f.borrow_mut() += 1);
    *slot.borrow_mut() = Some(second);

    graph.link(user.id(), "posts", post.id())?;
    assert_eq!(
        *second_fired.borrow(),
        1,
        "snapshot delivery still reaches the cancelled-later subscriber"
    );

    let p2 = graph.insert("post", Patch::new())?;
    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(*second_fired.borrow(), 1, "cancellation holds afterwards");
    Ok(())
}

#[test]
fn node_deletion_drops_subscriptions_and_runs_cleanups() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("name", "a"))?;
    let cleaned = Rc::new(RefCell::new(0));
    let c = cleaned.clone();
    let _sub = user.prop("name").use_(move |_, _| {
        let c = c.clone();
        Some(Box::new(move || *c.borrow_mut() += 1) as Box<dyn FnOnce()>)
    });

    graph.delete(user.id());
    assert_eq!(*cleaned.borrow(), 1, "final cleanup runs on delete");
    Ok(())
}
