//! # Reflejo - Reactive In-Memory Graph Store
//!
//! Reflejo is an embedded, single-threaded reactive graph store: typed nodes
//! and edges with covering-index query planning, incrementally maintained
//! rollups (scalar aggregates, single-target references, filtered
//! collections), and virtualized tree views with per-path subscriptions.
//!
//! ## Quick Start
//!
//! ```rust
//! use reflejo::schema::*;
//! use reflejo::Patch;
//!
//! let schema = Schema {
//!     types: vec![
//!         TypeDecl::new("user")
//!             .prop("name")
//!             .edge(EdgeDecl::new("posts", "post").reverse("author"))
//!             .rollup(RollupDecl::count("post_count", "posts")),
//!         TypeDecl::new("post").prop("title"),
//!     ],
//! };
//!
//! let graph = reflejo::create(&schema)?;
//! let user = graph.insert("user", Patch::new().with("name", "ada"))?;
//! let post = graph.insert("post", Patch::new().with("title", "hello"))?;
//! user.edge("posts")?.link(post.id())?;
//! assert_eq!(user.prop("post_count").get(), 1.0.into());
//! # Ok::<(), reflejo::GraphError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Ordered sets**: skip lists with per-level span counts give O(log n)
//!   rank/seek over every index.
//! - **Catalog**: schemas validate once; ids are interned and dependency
//!   tables precomputed.
//! - **Store**: one mutation at a time updates storage, indexes, rollups,
//!   derived edges and view bookkeeping, then drains user callbacks in
//!   pipeline order. Callbacks may re-enter the engine freely.
//! - **Views**: sparse expansion metadata plus per-path subtree sizes keep
//!   viewport resolution sub-linear in the tree size.
//!
//! There is no persistence, no wire protocol and no thread sharing; the
//! engine is a library surface only.

pub mod error;
pub mod graph;
pub mod index;
pub mod logging;
pub mod model;
pub mod reactive;
pub mod schema;
pub mod types;
pub mod view;

mod rollup;
mod store;

// Re-export the main public API
pub use crate::error::{GraphError, Result};
pub use crate::graph::{create, Graph, NodeHandle, ViewSpec};
pub use crate::model::{Patch, Value, NIL};
pub use crate::reactive::{EdgeHandle, RefHandle, Signal, Subscription};
pub use crate::schema::{Catalog, Schema};
pub use crate::store::Cleanup;
pub use crate::types::{NodeId, NULL_NODE_ID};
pub use crate::view::{EdgeConfig, ExpandMeta, FlagSpec, NodeProps, View, ViewItem};
