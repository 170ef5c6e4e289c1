#![allow(missing_docs)]

use reflejo::schema::*;
use reflejo::{EdgeConfig, Patch, Result, Value, ViewSpec};
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
                        .index(&["title"]),
                ),
            TypeDecl::new("post")
                .prop("title")
                .edge(EdgeDecl::new("comments", "comment")),
            TypeDecl::new("comment").prop("body"),
        ],
    }
}

#[test]
fn multi_parent_changes_deliver_once_per_path() -> Result<()> {
    // S4: one post under two expanded parents.
    let graph = reflejo::create(&schema())?;
    let u1 = graph.insert("user", Patch::new())?;
    let u2 = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "t"))?;
    graph.link(u1.id(), "posts", post.id())?;
    graph.link(u2.id(), "posts", post.id())?;

    let changes = Rc::new(RefCell::new(0));
    let leaves = Rc::new(RefCell::new(0));
    let c = changes.clone();
    let l = leaves.clone();
    let view = graph.view(
        ViewSpec::new("user")
            .edge("posts", EdgeConfig::new())
            .on_change(move |_, _, _, _| *c.borrow_mut() += 1)
            .on_leave(move |_, _, _| *l.borrow_mut() += 1),
    )?;

    assert!(view.expand(u1.id(), "posts")?);
    assert!(view.expand(u2.id(), "posts")?);
    assert_eq!(view.visible_total(), 4);

    post.prop("title").set("x")?;
    assert_eq!(*changes.borrow(), 2, "once per visible path");

    graph.unlink(u1.id(), "posts", post.id())?;
    assert_eq!(*leaves.borrow(), 1, "leave fires for the unlinked path only");

    post.prop("title").set("y")?;
    assert_eq!(*changes.borrow(), 3, "one remaining path");
    view.destroy();
    Ok(())
}

#[test]
fn inline_edges_hoist_descendants() -> Result<()> {
    // S5: user -> posts (inline, eager) -> comments (eager).
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new())?;
    let c1 = graph.insert("comment", Patch::new())?;
    let c2 = graph.insert("comment", Patch::new())?;
    graph.link(user.id(), "posts", post.id())?;
    graph.link(post.id(), "comments", c1.id())?;
    graph.link(post.id(), "comments", c2.id())?;

    let view = graph.view(
        ViewSpec::new("user").edge(
            "posts",
            EdgeConfig::new()
                .inline(true)
                .eager(true)
                .edge("comments", EdgeConfig::new().eager(true)),
        ),
    )?;

    let items: Vec<(reflejo::NodeId, usize)> =
        view.collect().into_iter().map(|i| (i.id, i.depth)).collect();
    assert_eq!(
        items,
        vec![(user.id(), 0), (c1.id(), 1), (c2.id(), 1)],
        "post is hoisted away, comments keep depth 1"
    );
    assert_eq!(view.visible_total(), 3);
    view.destroy();
    Ok(())
}

#[test]
fn inline_edge_tracks_live_links() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let view = graph.view(
        ViewSpec::new("user").edge(
            "posts",
            EdgeConfig::new()
                .inline(true)
                .eager(true)
                .edge("comments", EdgeConfig::new().eager(true)),
        ),
    )?;
    assert_eq!(view.visible_total(), 1);

    let post = graph.insert("post", Patch::new())?;
    graph.link(user.id(), "posts", post.id())?;
    assert_eq!(view.visible_total(), 1, "inline child adds no position");

    let c1 = graph.insert("comment", Patch::new())?;
    graph.link(post.id(), "comments", c1.id())?;
    assert_eq!(view.visible_total(), 2, "hoisted descendant is visible");
    view.destroy();
    Ok(())
}

#[test]
fn skip_take_with_sort_window() -> Result<()> {
    // S6: sort title asc, skip 1, take 2 over A..D.
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    for title in ["D", "A", "C", "B"] {
        let post = graph.insert("post", Patch::new().with("title", title))?;
        graph.link(user.id(), "posts", post.id())?;
    }
    let view = graph.view(
        ViewSpec::new("user").edge(
            "posts",
            EdgeConfig::new().sort(Sort::asc("title")).skip(1).take(2),
        ),
    )?;
    assert!(view.expand(user.id(), "posts")?);

    let titles: Vec<Value> = view
        .collect()
        .into_iter()
        .skip(1)
        .map(|i| i.node().prop("title").get())
        .collect();
    assert_eq!(titles, vec!["B".into(), "C".into()]);
    assert_eq!(view.visible_total(), 3, "one root plus the window");
    view.destroy();
    Ok(())
}

#[test]
fn take_zero_still_subscribes_and_skip_can_exhaust() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "a"))?;
    graph.link(user.id(), "posts", post.id())?;

    let view = graph.view(
        ViewSpec::new("user").edge("posts", EdgeConfig::new().take(0)),
    )?;
    assert!(view.expand(user.id(), "posts")?);
    assert_eq!(view.visible_total(), 1, "take 0 yields no children");

    let p2 = graph.insert("post", Patch::new().with("title", "b"))?;
    graph.link(user.id(), "posts", p2.id())?;
    assert_eq!(view.visible_total(), 1, "window stays empty");
    view.destroy();

    let view = graph.view(
        ViewSpec::new("user").edge("posts", EdgeConfig::new().skip(10)),
    )?;
    assert!(view.expand(user.id(), "posts")?);
    assert_eq!(view.visible_total(), 1, "skip past the end yields zero");
    view.destroy();
    Ok(())
}

#[test]
fn expand_collapse_round_trip_restores_state() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "a"))?;
    let comment = graph.insert("comment", Patch::new())?;
    graph.link(user.id(), "posts", post.id())?;
    graph.link(post.id(), "comments", comment.id())?;

    let changes = Rc::new(RefCell::new(0));
    let c = changes.clone();
    let view = graph.view(
        ViewSpec::new("user")
            .edge("posts", EdgeConfig::new().edge("comments", EdgeConfig::new()))
            .on_change(move |_, _, _, _| *c.borrow_mut() += 1),
    )?;

    assert!(view.expand(user.id(), "posts")?);
    assert!(view.expand(post.id(), "comments")?);
    assert_eq!(view.visible_total(), 3);

    // Collapsing the outer edge cascades to the nested expansion.
    assert!(view.collapse(user.id(), "posts")?);
    assert_eq!(view.visible_total(), 1);

    post.prop("title").set("b")?;
    comment.prop("body").set("hi")?;
    assert_eq!(*changes.borrow(), 0, "collapsed subtree is unwatched");

    // A second round trip behaves identically.
    assert!(view.expand(user.id(), "posts")?);
    assert_eq!(view.visible_total(), 2);
    assert!(view.collapse(user.id(), "posts")?);
    assert_eq!(view.visible_total(), 1);
    view.destroy();
    Ok(())
}

#[test]
fn root_filter_transitions_fire_enter_and_leave() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let hot = graph.insert("user", Patch::new().with("karma", 10.0))?;
    let cold = graph.insert("user", Patch::new().with("karma", 1.0))?;

    let enters = Rc::new(RefCell::new(Vec::new()));
    let leaves = Rc::new(RefCell::new(Vec::new()));
    let e = enters.clone();
    let l = leaves.clone();
    let view = graph.view(
        ViewSpec::new("user")
            .filter(Filter::eq("karma", 10.0))
            .on_enter(move |n, _, _, _| e.borrow_mut().push(n.id()))
            .on_leave(move |n, _, _| l.borrow_mut().push(n.id())),
    )?;
    assert_eq!(view.total(), 1);
    assert_eq!(*enters.borrow(), vec![hot.id()], "initial walk enters roots");

    cold.prop("karma").set(10.0)?;
    assert_eq!(view.total(), 2);
    assert_eq!(enters.borrow().len(), 2);

    hot.prop("karma").set(3.0)?;
    assert_eq!(view.total(), 1);
    assert_eq!(*leaves.borrow(), vec![hot.id()]);

    graph.delete(cold.id());
    assert_eq!(view.total(), 0);
    assert_eq!(leaves.borrow().len(), 2);
    view.destroy();
    Ok(())
}

#[test]
fn eager_edges_expand_for_new_roots() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let expands = Rc::new(RefCell::new(Vec::new()));
    let x = expands.clone();
    let view = graph.view(
        ViewSpec::new("user")
            .edge("posts", EdgeConfig::new().eager(true))
            .on_expand(move |_, edge, meta| {
                x.borrow_mut().push((edge.to_string(), meta.eager));
            }),
    )?;

    let user = graph.insert("user", Patch::new())?;
    assert_eq!(*expands.borrow(), vec![("posts".to_string(), true)]);

    let post = graph.insert("post", Patch::new().with("title", "a"))?;
    graph.link(user.id(), "posts", post.id())?;
    assert_eq!(view.visible_total(), 2, "eager expansion counts new links");
    view.destroy();
    Ok(())
}

#[test]
fn seek_items_and_positions() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let mut users = Vec::new();
    for i in 0..5 {
        users.push(graph.insert("user", Patch::new().with("karma", i as f64))?);
    }
    let view = graph.view(ViewSpec::new("user").offset(1).limit(2))?;

    assert_eq!(view.total(), 5);
    assert_eq!(view.visible_total(), 5);

    let window: Vec<reflejo::NodeId> = view.items().into_iter().map(|i| i.id).collect();
    assert_eq!(window, vec![users[1].id(), users[2].id()], "viewport slice");

    view.scroll(3);
    let window: Vec<reflejo::NodeId> = view.items().into_iter().map(|i| i.id).collect();
    assert_eq!(window, vec![users[3].id(), users[4].id()]);

    assert_eq!(view.seek(0).map(|i| i.id), Some(users[0].id()));
    assert_eq!(view.seek(4).map(|i| i.id), Some(users[4].id()));
    assert!(view.seek(5).is_none(), "seek past visible_total");
    assert_eq!(view.position_of(users[3].id()), Some(3));
    assert_eq!(view.position_of(reflejo::NodeId(999)), None);
    view.destroy();
    Ok(())
}

#[test]
fn item_handles_address_exact_paths() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let u1 = graph.insert("user", Patch::new())?;
    let u2 = graph.insert("user", Patch::new())?;
    let post = graph.insert("post", Patch::new().with("title", "t"))?;
    graph.link(u1.id(), "posts", post.id())?;
    graph.link(u2.id(), "posts", post.id())?;

    let view = graph.view(ViewSpec::new("user").edge("posts", EdgeConfig::new()))?;
    let roots = view.collect();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0].child_count("posts"), 1);
    assert!(!roots[0].is_expanded("posts"));

    // Expand only the second occurrence's path.
    assert!(roots[1].expand("posts")?);
    assert!(roots[1].is_expanded("posts"));
    assert!(!roots[0].is_expanded("posts"));
    assert_eq!(view.visible_total(), 3);

    let items = view.collect();
    let child = items
        .iter()
        .find(|i| i.id == post.id())
        .expect("post visible");
    assert_eq!(child.parent, Some(u2.id()));
    assert_eq!(child.edge.as_deref(), Some("posts"));
    assert_eq!(child.path_key(), format!("{}:posts:{}", u2.id(), post.id()));

    assert!(child.toggle("comments")?, "expand via item handle");
    assert!(!child.toggle("comments")?, "second toggle collapses");
    view.destroy();
    Ok(())
}

#[test]
fn destroyed_views_go_silent() -> Result<()> {
    let graph = reflejo::create(&schema())?;
    let user = graph.insert("user", Patch::new())?;
    let enters = Rc::new(RefCell::new(0));
    let e = enters.clone();
    let view = graph.view(
        ViewSpec::new("user").on_enter(move |_, _, _, _| *e.borrow_mut() += 1),
    )?;
    assert_eq!(*enters.borrow(), 1);
    view.destroy();

    graph.insert("user", Patch::new())?;
    user.prop("karma").set(5.0)?;
    assert_eq!(*enters.borrow(), 1, "no callbacks after destroy");
    assert_eq!(view.visible_total(), 0);
    Ok(())
}
