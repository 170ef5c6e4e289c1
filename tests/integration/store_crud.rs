#![allow(missing_docs)]

use reflejo::schema::*;
use reflejo::{GraphError, Patch, Result, Value, NIL};
use std::cell::RefCell;
use std::rc::Rc;

fn schema() -> Schema {
    Schema {
        types: vec![
            TypeDecl::new("user")
                .prop("name")
                .prop("karma")
                .index(IndexDecl::on("by_karma", &["karma"]))
                .edge(
                    EdgeDecl::new("posts", "post")
                        .reverse("author")
                        .index(&["title"])
                        .index_with(vec![IndexField::desc("score")]),
                ),
            TypeDecl::new("post").prop("title").prop("score"),
        ],
    }
}

#[test]
fn insert_get_update_delete() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("name", "ada").with("karma", 3.0))?;
    assert!(graph.get(user.id()).is_some());
    assert_eq!(user.prop("name").get(), "ada".into());
    assert_eq!(user.prop("karma").get(), 3.0.into());

    assert!(graph.update(user.id(), Patch::new().with("karma", 4.0))?);
    assert_eq!(user.prop("karma").get(), 4.0.into());

    assert!(graph.clear_prop(user.id(), "karma")?);
    assert_eq!(user.prop("karma").get(), Value::Nil);

    assert!(graph.delete(user.id()));
    assert!(graph.get(user.id()).is_none());
    assert!(!graph.delete(user.id()));
    Ok(())
}

#[test]
fn update_unknown_id_returns_false() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    assert!(!graph.update(reflejo::NodeId(999), Patch::new().with("name", "x"))?);
    Ok(())
}

#[test]
fn insert_errors_on_unknown_type() {
    let graph = reflejo::create(&schema()).unwrap();
    assert!(matches!(
        graph.insert("ghost", Patch::new()),
        Err(GraphError::UnknownType(_))
    ));
}

#[test]
fn nil_patch_clears_while_absent_key_preserves() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("name", "ada").with("karma", 1.0))?;
    graph.update(user.id(), Patch::new().with("name", NIL))?;
    assert_eq!(user.prop("name").get(), Value::Nil);
    assert_eq!(user.prop("karma").get(), 1.0.into(), "untouched key survives");
    Ok(())
}

#[test]
fn link_unlink_round_trip_is_symmetric() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "a"))?;

    assert!(graph.link(user.id(), "posts", post.id())?);
    assert!(graph.has_edge(user.id(), "posts", post.id())?);
    assert!(graph.has_edge(post.id(), "author", user.id())?, "reverse entry exists");
    assert_eq!(graph.targets_count(user.id(), "posts")?, 1);
    assert_eq!(graph.sources(post.id(), "posts")?.len(), 1);

    // Double link is a no-op from either side.
    assert!(!graph.link(user.id(), "posts", post.id())?);
    assert!(!graph.link(post.id(), "author", user.id())?);
    assert_eq!(graph.targets_count(user.id(), "posts")?, 1);

    assert!(graph.unlink(user.id(), "posts", post.id())?);
    assert!(!graph.has_edge(user.id(), "posts", post.id())?);
    assert!(!graph.has_edge(post.id(), "author", user.id())?);
    assert!(!graph.unlink(user.id(), "posts", post.id())?);
    Ok(())
}

#[test]
fn linking_from_the_reverse_side_is_equivalent() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;
    assert!(graph.link(post.id(), "author", user.id())?);
    assert!(graph.has_edge(user.id(), "posts", post.id())?);
    Ok(())
}

#[test]
fn link_with_missing_endpoint_is_a_quiet_no_op() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    assert!(!graph.link(user.id(), "posts", reflejo::NodeId(404))?);
    assert!(!graph.link(reflejo::NodeId(404), "posts", user.id())?);
    assert!(matches!(
        graph.link(user.id(), "ghost_edge", user.id()),
        Err(GraphError::UnknownEdge(_))
    ));
    Ok(())
}

#[test]
fn targets_iter_orders_by_covering_index() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    for (title, score) in [("c", 1.0), ("a", 3.0), ("b", 2.0)] {
        let post = graph.insert(
            "post",
            Patch::new().with("title", title).with("score", score),
        )?;
        graph.link(user.id(), "posts", post.id())?;
    }

    let by_title: Vec<Value> = graph
        .targets_iter(user.id(), "posts", 0, Some(0), None)?
        .into_iter()
        .map(|n| n.prop("title").get())
        .collect();
    assert_eq!(by_title, vec!["a".into(), "b".into(), "c".into()]);

    let by_score_desc: Vec<Value> = graph
        .targets_iter(user.id(), "posts", 0, Some(1), None)?
        .into_iter()
        .map(|n| n.prop("score").get())
        .collect();
    assert_eq!(by_score_desc, vec![3.0.into(), 2.0.into(), 1.0.into()]);

    let offset_tail: Vec<Value> = graph
        .targets_iter(user.id(), "posts", 2, Some(0), None)?
        .into_iter()
        .map(|n| n.prop("title").get())
        .collect();
    assert_eq!(offset_tail, vec!["c".into()]);
    Ok(())
}

#[test]
fn targets_iter_filters_through_the_index() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    for title in ["a", "b", "a"] {
        let post = graph.insert("post", Patch::new().with("title", title))?;
        graph.link(user.id(), "posts", post.id())?;
    }
    let hits = graph.targets_iter(
        user.id(),
        "posts",
        0,
        None,
        Some(vec![Filter::eq("title", "a")]),
    )?;
    assert_eq!(hits.len(), 2);

    let err = graph
        .targets_iter(
            user.id(),
            "posts",
            0,
            None,
            Some(vec![Filter::eq("score", 1.0), Filter::eq("title", "a")]),
        )
        .unwrap_err();
    assert!(err.to_string().starts_with("No index covers query ["));
    Ok(())
}

#[test]
fn child_property_change_rekeys_edge_indexes() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p1 = graph.insert("post", Patch::new().with("title", "a"))?;
    let p2 = graph.insert("post", Patch::new().with("title", "b"))?;
    graph.link(user.id(), "posts", p1.id())?;
    graph.link(user.id(), "posts", p2.id())?;

    // Move p1 after p2 in title order; the denormalized entry must follow.
    graph.update(p1.id(), Patch::new().with("title", "z"))?;
    let titles: Vec<Value> = graph
        .targets_iter(user.id(), "posts", 0, Some(0), None)?
        .into_iter()
        .map(|n| n.prop("title").get())
        .collect();
    assert_eq!(titles, vec!["b".into(), "z".into()]);
    Ok(())
}

#[test]
fn delete_unlinks_both_sides() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "a"))?;
    graph.link(user.id(), "posts", post.id())?;

    assert!(graph.delete(post.id()));
    assert_eq!(graph.targets_count(user.id(), "posts")?, 0);
    assert!(graph
        .targets_iter(user.id(), "posts", 0, Some(0), None)?
        .is_empty());
    Ok(())
}

#[test]
fn watch_fires_once_per_real_change() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("karma", 1.0))?;
    let log: Rc<RefCell<Vec<(String, Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let sub = graph.watch(user.id(), move |_, prop, new, old| {
        sink.borrow_mut()
            .push((prop.to_string(), new.clone(), old.clone()));
    });

    graph.update(user.id(), Patch::new().with("karma", 2.0))?;
    graph.update(user.id(), Patch::new().with("karma", 2.0))?; // equal: no event
    graph.update(user.id(), Patch::new().with("name", "ada"))?;

    {
        let log = log.borrow();
        assert_eq!(log.len(), 2, "equal write must not fire");
        assert_eq!(log[0], ("karma".into(), 2.0.into(), 1.0.into()));
        assert_eq!(log[1], ("name".into(), "ada".into(), Value::Nil));
    }

    sub.cancel();
    graph.update(user.id(), Patch::new().with("karma", 9.0))?;
    assert_eq!(log.borrow().len(), 2, "cancelled watcher stays silent");
    Ok(())
}

#[test]
fn callback_panic_is_swallowed_and_others_still_fire() -> Result<()> {
    reflejo::logging::init();
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let fired = Rc::new(RefCell::new(0));
    let _boom = graph.watch(user.id(), |_, _, _, _| panic!("listener bug"));
    let count = fired.clone();
    let _ok = graph.watch(user.id(), move |_, _, _, _| *count.borrow_mut() += 1);

    graph.update(user.id(), Patch::new().with("name", "x"))?;
    assert_eq!(*fired.borrow(), 1, "second subscriber runs after a panic");
    assert_eq!(user.prop("name").get(), "x".into(), "mutation is kept");
    Ok(())
}

#[test]
fn reentrant_mutation_from_callback_completes_first() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new().with("karma", 0.0))?;
    let g2 = graph.clone();
    let uid = user.id();
    // First subscriber issues a nested mutation; the nested mutation's
    // delivery drains before the outer queue resumes, so the second
    // subscriber observes karma before its own name event.
    let _trigger = graph.watch(uid, move |node, prop, _, _| {
        if prop == "name" {
            g2.update(uid, Patch::new().with("karma", 7.0)).unwrap();
            assert_eq!(node.prop("karma").get(), 7.0.into());
        }
    });
    let observed = Rc::new(RefCell::new(Vec::new()));
    let obs = observed.clone();
    let _recorder = graph.watch(uid, move |_, prop, new, _| {
        obs.borrow_mut().push((prop.to_string(), new.clone()));
    });
    graph.update(user.id(), Patch::new().with("name", "ada"))?;
    let observed = observed.borrow();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0], ("karma".into(), 7.0.into()));
    assert_eq!(observed[1], ("name".into(), "ada".into()));
    Ok(())
}
