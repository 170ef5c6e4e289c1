#![allow(missing_docs)]

use reflejo::schema::*;
use reflejo::{GraphError, Result};

fn blog_schema() -> Schema {
    Schema {
        types: vec![
            TypeDecl::new("user")
                .prop("name")
                .prop("karma")
                .index(IndexDecl::on("by_karma", &["karma"]))
                .edge(
                    EdgeDecl::new("posts", "post")
                        .reverse("author")
                        .index(&["published"])
                        .index_with(vec![IndexField::desc("created_at")]),
                )
                .rollup(RollupDecl::count("post_count", "posts"))
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
                .prop("created_at"),
        ],
    }
}

#[test]
fn builds_a_valid_schema() -> Result<()> {
    let graph = reflejo::create(&blog_schema())?;
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.type_count("user")?, 0);
    assert!(graph.type_count("nope").is_err());
    Ok(())
}

#[test]
fn rejects_duplicate_type_names() {
    let schema = Schema {
        types: vec![TypeDecl::new("a"), TypeDecl::new("a")],
    };
    assert!(matches!(
        reflejo::create(&schema),
        Err(GraphError::Schema(_))
    ));
}

#[test]
fn rejects_duplicate_properties() {
    let schema = Schema {
        types: vec![TypeDecl::new("a").prop("x").prop("x")],
    };
    assert!(matches!(
        reflejo::create(&schema),
        Err(GraphError::Schema(_))
    ));
}

#[test]
fn rejects_unknown_edge_target() {
    let schema = Schema {
        types: vec![TypeDecl::new("a").edge(EdgeDecl::new("links", "missing"))],
    };
    assert!(matches!(
        reflejo::create(&schema),
        Err(GraphError::Schema(_))
    ));
}

#[test]
fn rejects_unknown_index_field() {
    let schema = Schema {
        types: vec![TypeDecl::new("a")
            .prop("x")
            .index(IndexDecl::on("bad", &["y"]))],
    };
    assert!(reflejo::create(&schema).is_err());
}

#[test]
fn rejects_rollup_without_covering_edge_index() {
    // `published` collection filters on a field no edge index carries.
    let schema = Schema {
        types: vec![
            TypeDecl::new("user")
                .edge(EdgeDecl::new("posts", "post"))
                .rollup(RollupDecl::collection(
                    "published",
                    "posts",
                    vec![Filter::eq("published", true)],
                )),
            TypeDecl::new("post").prop("published"),
        ],
    };
    let err = reflejo::create(&schema).unwrap_err();
    assert!(
        err.to_string().contains("cannot be served by any edge index"),
        "unexpected error: {err}"
    );
}

#[test]
fn rejects_rollup_name_colliding_with_property() {
    let schema = Schema {
        types: vec![
            TypeDecl::new("user")
                .prop("post_count")
                .edge(EdgeDecl::new("posts", "post"))
                .rollup(RollupDecl::count("post_count", "posts")),
            TypeDecl::new("post"),
        ],
    };
    assert!(matches!(
        reflejo::create(&schema),
        Err(GraphError::Schema(_))
    ));
}

#[test]
fn rejects_property_rollup_without_compute() {
    let schema = Schema {
        types: vec![
            TypeDecl::new("user")
                .edge(EdgeDecl::new("posts", "post"))
                .rollup(RollupDecl {
                    name: "broken".into(),
                    kind: RollupKind::Property,
                    edge: "posts".into(),
                    compute: None,
                    property: None,
                    filters: vec![],
                    sort: None,
                }),
            TypeDecl::new("post"),
        ],
    };
    assert!(reflejo::create(&schema).is_err());
}

#[test]
fn view_without_covering_index_reports_filters() -> Result<()> {
    let graph = reflejo::create(&blog_schema())?;
    let err = graph
        .view(reflejo::ViewSpec::new("user").filter(Filter::eq("name", "ada")))
        .unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.starts_with("No index covers query ["),
        "unexpected message: {msg}"
    );
    assert!(msg.contains("name eq"), "unexpected message: {msg}");
    Ok(())
}

#[test]
fn filtered_view_uses_declared_index() -> Result<()> {
    let graph = reflejo::create(&blog_schema())?;
    let view = graph.view(
        reflejo::ViewSpec::new("user").filter(Filter::eq("karma", 10.0)),
    )?;
    assert_eq!(view.total(), 0);
    view.destroy();
    Ok(())
}

#[test]
fn schema_json_round_trip() -> Result<()> {
    let schema = blog_schema();
    let json = schema.to_json()?;
    let back = Schema::from_json(&json)?;
    reflejo::create(&back)?;
    Ok(())
}

#[test]
fn schema_from_json_literal() -> Result<()> {
    let json = r#"{
        "types": [
            {
                "name": "task",
                "properties": ["label", "done"],
                "edges": [
                    {"name": "subtasks", "target": "task",
                     "reverse": "parent",
                     "indexes": [[{"field": "done"}]]}
                ],
                "rollups": [
                    {"name": "open_count", "kind": "property",
                     "edge": "subtasks", "compute": "count",
                     "filters": [{"field": "done", "value": false}]}
                ]
            }
        ]
    }"#;
    let schema = Schema::from_json(json)?;
    let graph = reflejo::create(&schema)?;
    let root = graph.insert("task", reflejo::Patch::new().with("label", "root"))?;
    assert_eq!(root.prop("open_count").get(), 0.0.into());
    Ok(())
}
