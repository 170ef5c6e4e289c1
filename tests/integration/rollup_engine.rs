#![allow(missing_docs)]

use reflejo::schema::*;
use reflejo::{GraphError, Patch, Result, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn schema() -> Schema {
    Schema {
        types: vec![
            TypeDecl::new("user")
                .edge(
                    EdgeDecl::new("posts", "post")
                        .reverse("author")
                        .index(&["published"])
                        .index_with(vec![IndexField::desc("created_at")])
                        .index(&["score"]),
                )
                .rollup(RollupDecl::count("post_count", "posts"))
                .rollup(RollupDecl::property(
                    "score_sum",
                    "posts",
                    Compute::Sum,
                    "score",
                ))
                .rollup(RollupDecl::property(
                    "score_avg",
                    "posts",
                    Compute::Avg,
                    "score",
                ))
                .rollup(RollupDecl::property(
                    "score_min",
                    "posts",
                    Compute::Min,
                    "score",
                ))
                .rollup(RollupDecl::property(
                    "score_max",
                    "posts",
                    Compute::Max,
                    "score",
                ))
                .rollup(
                    RollupDecl::property("any_published", "posts", Compute::Any, "published")
                        .filtered(vec![]),
                )
                .rollup(RollupDecl::property(
                    "all_published",
                    "posts",
                    Compute::All,
                    "published",
                ))
                .rollup(RollupDecl::collection(
                    "published",
                    "posts",
                    vec![Filter::eq("published", true)],
                ))
                .rollup(RollupDecl::reference(
                    "latest",
                    "posts",
                    Sort::desc("created_at"),
                )),
            TypeDecl::new("post")
                .prop("title")
                .prop("published")
                .prop("score")
                .prop("created_at"),
        ],
    }
}

#[test]
fn count_rollup_tracks_link_unlink_delete() -> Result<()> {
    // S1: count across link/unlink/delete.
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    assert_eq!(user.prop("post_count").get(), 0.0.into());

    let p1 = graph.insert("post", Patch::new())?;
    let p2 = graph.insert("post", Patch::new())?;
    graph.link(user.id(), "posts", p1.id())?;
    assert_eq!(user.prop("post_count").get(), 1.0.into());
    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(user.prop("post_count").get(), 2.0.into());
    graph.unlink(user.id(), "posts", p1.id())?;
    assert_eq!(user.prop("post_count").get(), 1.0.into());
    graph.delete(p2.id());
    assert_eq!(user.prop("post_count").get(), 0.0.into());
    Ok(())
}

#[test]
fn empty_set_values_follow_the_table() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    assert_eq!(user.prop("post_count").get(), 0.0.into());
    assert_eq!(user.prop("score_sum").get(), 0.0.into());
    assert_eq!(user.prop("score_avg").get(), Value::Nil);
    assert_eq!(user.prop("score_min").get(), Value::Nil);
    assert_eq!(user.prop("score_max").get(), Value::Nil);
    assert_eq!(user.prop("any_published").get(), false.into());
    assert_eq!(user.prop("all_published").get(), false.into());
    assert_eq!(user.edge("published")?.count(), 0);
    assert!(user.reference("latest")?.get().is_none());
    Ok(())
}

#[test]
fn numeric_rollups_follow_property_changes() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p1 = graph.insert("post", Patch::new().with("score", 2.0))?;
    let p2 = graph.insert("post", Patch::new().with("score", 5.0))?;
    graph.link(user.id(), "posts", p1.id())?;
    graph.link(user.id(), "posts", p2.id())?;

    assert_eq!(user.prop("score_sum").get(), 7.0.into());
    assert_eq!(user.prop("score_avg").get(), 3.5.into());
    assert_eq!(user.prop("score_min").get(), 2.0.into());
    assert_eq!(user.prop("score_max").get(), 5.0.into());

    // Aggregated property moves on a still-matching target.
    graph.update(p1.id(), Patch::new().with("score", 6.0))?;
    assert_eq!(user.prop("score_sum").get(), 11.0.into());
    assert_eq!(user.prop("score_min").get(), 5.0.into(), "former min rescans");
    assert_eq!(user.prop("score_max").get(), 6.0.into());

    // Unlinking the max forces a max rescan.
    graph.unlink(user.id(), "posts", p1.id())?;
    assert_eq!(user.prop("score_sum").get(), 5.0.into());
    assert_eq!(user.prop("score_max").get(), 5.0.into());
    assert_eq!(user.prop("score_avg").get(), 5.0.into());
    Ok(())
}

#[test]
fn any_and_all_transitions() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p1 = graph.insert("post", Patch::new().with("published", false))?;
    let p2 = graph.insert("post", Patch::new().with("published", true))?;

    graph.link(user.id(), "posts", p1.id())?;
    assert_eq!(user.prop("any_published").get(), false.into());
    assert_eq!(user.prop("all_published").get(), false.into());

    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(user.prop("any_published").get(), true.into());
    assert_eq!(user.prop("all_published").get(), false.into());

    graph.update(p1.id(), Patch::new().with("published", true))?;
    assert_eq!(user.prop("all_published").get(), true.into());

    graph.unlink(user.id(), "posts", p2.id())?;
    assert_eq!(user.prop("any_published").get(), true.into());
    assert_eq!(user.prop("all_published").get(), true.into());

    graph.update(p1.id(), Patch::new().with("published", false))?;
    assert_eq!(user.prop("any_published").get(), false.into());
    assert_eq!(user.prop("all_published").get(), false.into());
    Ok(())
}

#[test]
fn filtered_collection_reacts_to_property_changes() -> Result<()> {
    // S2: membership follows the filter across property transitions.
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p1 = graph.insert(
        "post",
        Patch::new().with("published", true).with("title", "a"),
    )?;
    let p2 = graph.insert(
        "post",
        Patch::new().with("published", false).with("title", "b"),
    )?;
    graph.link(user.id(), "posts", p1.id())?;
    graph.link(user.id(), "posts", p2.id())?;

    let published = user.edge("published")?;
    assert_eq!(published.count(), 1);

    p2.prop("published").set(true)?;
    assert_eq!(published.count(), 2);

    p1.prop("published").set(false)?;
    assert_eq!(published.count(), 1);
    assert_eq!(published.pluck("title"), vec!["b".into()]);
    Ok(())
}

#[test]
fn reference_rollup_follows_sort_field_updates() -> Result<()> {
    // S3: latest = reference(posts, sort created_at desc).
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let p_old = graph.insert("post", Patch::new().with("created_at", 1.0))?;
    let p_new = graph.insert("post", Patch::new().with("created_at", 2.0))?;
    graph.link(user.id(), "posts", p_old.id())?;
    graph.link(user.id(), "posts", p_new.id())?;

    let latest = user.reference("latest")?;
    assert_eq!(latest.get().map(|n| n.id()), Some(p_new.id()));

    let calls: Rc<RefCell<Vec<(Option<reflejo::NodeId>, Option<reflejo::NodeId>)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    let _sub = latest.use_(move |new, old| {
        sink.borrow_mut()
            .push((new.map(|n| n.id()), old.map(|n| n.id())));
        None
    });
    assert_eq!(calls.borrow().len(), 1, "effect runs immediately");

    p_old.prop("created_at").set(3.0)?;
    assert_eq!(latest.get().map(|n| n.id()), Some(p_old.id()));
    let calls = calls.borrow();
    assert_eq!(calls.len(), 2, "one coalesced call per target change");
    assert_eq!(calls[1], (Some(p_old.id()), Some(p_new.id())));
    Ok(())
}

#[test]
fn reference_derived_edge_reads_like_an_edge() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("created_at", 1.0))?;
    graph.link(user.id(), "posts", post.id())?;

    let latest = user.edge("latest")?;
    assert_eq!(latest.count(), 1);
    assert!(latest.has(post.id()));
    assert_eq!(graph.targets_count(user.id(), "latest")?, 1);
    Ok(())
}

#[test]
fn rollup_round_trip_restores_previous_values() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert(
        "post",
        Patch::new()
            .with("score", 4.0)
            .with("published", true)
            .with("created_at", 9.0),
    )?;

    let before = [
        user.prop("post_count").get(),
        user.prop("score_sum").get(),
        user.prop("score_avg").get(),
        user.prop("score_min").get(),
        user.prop("score_max").get(),
        user.prop("any_published").get(),
        user.prop("all_published").get(),
    ];
    graph.link(user.id(), "posts", post.id())?;
    graph.unlink(user.id(), "posts", post.id())?;
    let after = [
        user.prop("post_count").get(),
        user.prop("score_sum").get(),
        user.prop("score_avg").get(),
        user.prop("score_min").get(),
        user.prop("score_max").get(),
        user.prop("any_published").get(),
        user.prop("all_published").get(),
    ];
    assert_eq!(before, after);
    assert_eq!(user.edge("published")?.count(), 0);
    assert!(user.reference("latest")?.get().is_none());
    Ok(())
}

#[test]
fn rollup_outputs_are_read_only() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    assert!(matches!(
        graph.update(user.id(), Patch::new().with("post_count", 99.0)),
        Err(GraphError::ReadOnlyProperty(_))
    ));
    assert!(matches!(
        user.prop("post_count").set(99.0),
        Err(GraphError::ReadOnlyProperty(_))
    ));
    Ok(())
}

#[test]
fn derived_edges_reject_mutation() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;
    assert!(matches!(
        graph.link(user.id(), "published", post.id()),
        Err(GraphError::ReadOnlyEdge(_))
    ));
    assert!(matches!(
        user.edge("published")?.link(post.id()),
        Err(GraphError::ReadOnlyEdge(_))
    ));
    assert!(matches!(
        user.edge("latest")?.unlink(post.id()),
        Err(GraphError::ReadOnlyEdge(_))
    ));
    Ok(())
}

#[test]
fn rollup_writes_notify_like_ordinary_properties() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let _sub = graph.watch(user.id(), move |_, prop, new, _| {
        if prop == "post_count" {
            sink.borrow_mut().push(new.clone());
        }
    });
    let post = graph.insert("post", Patch::new())?;
    graph.link(user.id(), "posts", post.id())?;
    graph.unlink(user.id(), "posts", post.id())?;
    assert_eq!(*seen.borrow(), vec![1.0.into(), 0.0.into()]);
    Ok(())
}
