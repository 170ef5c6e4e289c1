//! Validated, interned schema catalog.
//!
//! `Catalog::build` checks a [`Schema`] once and precomputes everything the
//! store needs at mutation time: interned ids, per-type index tables, edge
//! slot layouts (including hidden reverse slots and derived edges), and the
//! dependency tables that answer "which indexes / rollups care about this
//! property" without scanning.

use crate::error::{GraphError, Result};
use crate::index::planner::{self, IndexQuery};
use crate::schema::{
    Compute, CompiledFilter, Dir, Filter, RollupKind, Schema, Sort,
};
use crate::types::{EdgeDefId, PropId, RollupId, TypeId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Name of the implicit primary index every type carries (empty field list,
/// id order).
pub const PRIMARY_INDEX: &str = "primary";

#[derive(Debug)]
pub(crate) struct PropMeta {
    pub name: String,
    /// Set when the property is a rollup output (read-only for users).
    pub rollup: Option<RollupId>,
}

#[derive(Debug)]
pub(crate) struct IndexMeta {
    pub name: String,
    pub fields: Vec<(PropId, Dir)>,
}

#[derive(Debug)]
pub(crate) struct EdgeIndexMeta {
    pub fields: Vec<(PropId, Dir)>,
}

#[derive(Debug)]
pub(crate) enum EdgeKind {
    Forward {
        reverse: EdgeDefId,
        indexes: Vec<EdgeIndexMeta>,
        rollups: SmallVec<[RollupId; 2]>,
    },
    Reverse {
        forward: EdgeDefId,
    },
    Derived {
        rollup: RollupId,
    },
}

#[derive(Debug)]
pub(crate) struct EdgeMeta {
    pub name: String,
    pub owner: TypeId,
    /// Position in the owner's per-node edge slot table.
    pub slot: usize,
    pub target: TypeId,
    pub kind: EdgeKind,
}

#[derive(Debug)]
pub(crate) struct RollupMeta {
    pub name: String,
    pub owner: TypeId,
    pub kind: RollupKind,
    pub base_edge: EdgeDefId,
    pub compute: Option<Compute>,
    /// Aggregated target property.
    pub property: Option<PropId>,
    /// Qualification filters over target properties.
    pub filters: Vec<CompiledFilter>,
    pub sort: Option<(PropId, Dir)>,
    /// Chosen base-edge index window when filters/sort are present.
    pub query: Option<IndexQuery>,
    /// Output pseudo-property on the owner (property rollups).
    pub output_prop: Option<PropId>,
    /// Materialized derived edge (reference/collection rollups).
    pub derived_edge: Option<EdgeDefId>,
}

#[derive(Debug)]
pub(crate) struct TypeMeta {
    pub name: String,
    pub props: Vec<PropMeta>,
    pub prop_by_name: FxHashMap<String, PropId>,
    /// Edge slot table: forward edges, declared/hidden reverses, derived.
    pub edges: Vec<EdgeDefId>,
    /// Public edge names (forward, declared reverse, derived).
    pub edge_by_name: FxHashMap<String, EdgeDefId>,
    /// Type indexes; position 0 is the implicit primary index.
    pub indexes: Vec<IndexMeta>,
    pub rollups: Vec<RollupId>,
    /// Per property: positions in `indexes` that key on it.
    pub prop_type_indexes: Vec<SmallVec<[usize; 2]>>,
}

/// Reference to one edge index, used by the re-keying dependency table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeIndexRef {
    pub edge: EdgeDefId,
    pub index_no: usize,
}

/// Validated, interned catalog. Immutable after construction.
#[derive(Debug)]
pub struct Catalog {
    pub(crate) types: Vec<TypeMeta>,
    pub(crate) type_by_name: FxHashMap<String, TypeId>,
    pub(crate) edges: Vec<EdgeMeta>,
    pub(crate) rollups: Vec<RollupMeta>,
    /// (target type, target prop) -> edge indexes denormalizing it.
    pub(crate) edge_field_deps: FxHashMap<(TypeId, PropId), Vec<EdgeIndexRef>>,
    /// (target type, target prop) -> property rollups reading it.
    pub(crate) rollup_prop_deps: FxHashMap<(TypeId, PropId), Vec<RollupId>>,
    /// (target type, target prop) -> reference/collection rollups reading it.
    pub(crate) derived_prop_deps: FxHashMap<(TypeId, PropId), Vec<RollupId>>,
}

impl Catalog {
    /// Validates the schema and builds the catalog. All schema errors are
    /// fatal here; nothing later re-validates.
    pub fn build(schema: &Schema) -> Result<Self> {
        let mut cat = Catalog {
            types: Vec::new(),
            type_by_name: FxHashMap::default(),
            edges: Vec::new(),
            rollups: Vec::new(),
            edge_field_deps: FxHashMap::default(),
            rollup_prop_deps: FxHashMap::default(),
            derived_prop_deps: FxHashMap::default(),
        };
        cat.intern_types(schema)?;
        cat.intern_edges(schema)?;
        cat.intern_rollup_outputs(schema)?;
        cat.resolve_type_indexes(schema)?;
        cat.resolve_edge_indexes(schema)?;
        cat.resolve_rollups(schema)?;
        cat.build_dep_tables();
        Ok(cat)
    }

    fn intern_types(&mut self, schema: &Schema) -> Result<()> {
        for decl in &schema.types {
            if self.type_by_name.contains_key(&decl.name) {
                return Err(GraphError::Schema(format!("duplicate type {}", decl.name)));
            }
            let id = TypeId(self.types.len() as u16);
            self.type_by_name.insert(decl.name.clone(), id);
            let mut meta = TypeMeta {
                name: decl.name.clone(),
                props: Vec::new(),
                prop_by_name: FxHashMap::default(),
                edges: Vec::new(),
                edge_by_name: FxHashMap::default(),
                indexes: Vec::new(),
                rollups: Vec::new(),
                prop_type_indexes: Vec::new(),
            };
            for prop in &decl.properties {
                if meta.prop_by_name.contains_key(prop) {
                    return Err(GraphError::Schema(format!(
                        "duplicate property {}.{prop}",
                        decl.name
                    )));
                }
                let pid = PropId(meta.props.len() as u16);
                meta.prop_by_name.insert(prop.clone(), pid);
                meta.props.push(PropMeta {
                    name: prop.clone(),
                    rollup: None,
                });
            }
            self.types.push(meta);
        }
        Ok(())
    }

    fn intern_edges(&mut self, schema: &Schema) -> Result<()> {
        // Forward edges first so ids are stable, then reverse companions.
        for decl in &schema.types {
            let owner = self.type_by_name[&decl.name];
            for edge in &decl.edges {
                let target = *self.type_by_name.get(&edge.target).ok_or_else(|| {
                    GraphError::Schema(format!(
                        "edge {}.{} targets unknown type {}",
                        decl.name, edge.name, edge.target
                    ))
                })?;
                let fwd_id = EdgeDefId(self.edges.len() as u32);
                self.claim_edge_name(owner, &edge.name, fwd_id)?;
                let slot = self.types[owner.idx()].edges.len();
                self.types[owner.idx()].edges.push(fwd_id);
                self.edges.push(EdgeMeta {
                    name: edge.name.clone(),
                    owner,
                    slot,
                    target,
                    kind: EdgeKind::Forward {
                        reverse: EdgeDefId(0), // patched below
                        indexes: Vec::new(),
                        rollups: SmallVec::new(),
                    },
                });

                let rev_id = EdgeDefId(self.edges.len() as u32);
                let rev_hidden = edge.reverse.is_none();
                let rev_name = edge
                    .reverse
                    .clone()
                    .unwrap_or_else(|| format!("~{}:{}", decl.name, edge.name));
                if !rev_hidden {
                    self.claim_edge_name(target, &rev_name, rev_id)?;
                }
                let rev_slot = self.types[target.idx()].edges.len();
                self.types[target.idx()].edges.push(rev_id);
                self.edges.push(EdgeMeta {
                    name: rev_name,
                    owner: target,
                    slot: rev_slot,
                    target: owner,
                    kind: EdgeKind::Reverse { forward: fwd_id },
                });
                if let EdgeKind::Forward { reverse, .. } = &mut self.edges[fwd_id.idx()].kind {
                    *reverse = rev_id;
                }
            }
        }
        Ok(())
    }

    fn claim_edge_name(&mut self, ty: TypeId, name: &str, id: EdgeDefId) -> Result<()> {
        let meta = &mut self.types[ty.idx()];
        if meta.edge_by_name.contains_key(name) {
            return Err(GraphError::Schema(format!(
                "duplicate edge {}.{name}",
                meta.name
            )));
        }
        meta.edge_by_name.insert(name.to_string(), id);
        Ok(())
    }

    /// Interns property-rollup output names so indexes and filters can
    /// reference them.
    fn intern_rollup_outputs(&mut self, schema: &Schema) -> Result<()> {
        let mut next_rollup = 0u32;
        for decl in &schema.types {
            let owner = self.type_by_name[&decl.name];
            for rollup in &decl.rollups {
                let rid = RollupId(next_rollup);
                next_rollup += 1;
                self.types[owner.idx()].rollups.push(rid);
                if rollup.kind == RollupKind::Property {
                    let meta = &mut self.types[owner.idx()];
                    if meta.prop_by_name.contains_key(&rollup.name) {
                        return Err(GraphError::Schema(format!(
                            "rollup {}.{} collides with a declared property",
                            decl.name, rollup.name
                        )));
                    }
                    let pid = PropId(meta.props.len() as u16);
                    meta.prop_by_name.insert(rollup.name.clone(), pid);
                    meta.props.push(PropMeta {
                        name: rollup.name.clone(),
                        rollup: Some(rid),
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_type_indexes(&mut self, schema: &Schema) -> Result<()> {
        for decl in &schema.types {
            let ty = self.type_by_name[&decl.name];
            let mut indexes = vec![IndexMeta {
                name: PRIMARY_INDEX.to_string(),
                fields: Vec::new(),
            }];
            let mut seen = FxHashMap::default();
            seen.insert(PRIMARY_INDEX.to_string(), ());
            for idx in &decl.indexes {
                if seen.insert(idx.name.clone(), ()).is_some() {
                    return Err(GraphError::Schema(format!(
                        "duplicate index {}.{}",
                        decl.name, idx.name
                    )));
                }
                let fields = idx
                    .fields
                    .iter()
                    .map(|f| Ok((self.require_prop(ty, &f.field)?, f.dir)))
                    .collect::<Result<Vec<_>>>()?;
                indexes.push(IndexMeta {
                    name: idx.name.clone(),
                    fields,
                });
            }
            let meta = &mut self.types[ty.idx()];
            meta.prop_type_indexes = vec![SmallVec::new(); meta.props.len()];
            for (no, idx) in indexes.iter().enumerate() {
                for (prop, _) in &idx.fields {
                    meta.prop_type_indexes[prop.idx()].push(no);
                }
            }
            meta.indexes = indexes;
        }
        Ok(())
    }

    fn resolve_edge_indexes(&mut self, schema: &Schema) -> Result<()> {
        for decl in &schema.types {
            let owner = self.type_by_name[&decl.name];
            for edge in &decl.edges {
                let eid = self.types[owner.idx()].edge_by_name[&edge.name];
                let target = self.edges[eid.idx()].target;
                let mut resolved = Vec::new();
                for fields in &edge.indexes {
                    let fields = fields
                        .iter()
                        .map(|f| Ok((self.require_prop(target, &f.field)?, f.dir)))
                        .collect::<Result<Vec<_>>>()?;
                    resolved.push(EdgeIndexMeta { fields });
                }
                if let EdgeKind::Forward { indexes, .. } = &mut self.edges[eid.idx()].kind {
                    *indexes = resolved;
                }
            }
        }
        Ok(())
    }

    fn resolve_rollups(&mut self, schema: &Schema) -> Result<()> {
        for decl in &schema.types {
            let owner = self.type_by_name[&decl.name];
            let rollup_ids = self.types[owner.idx()].rollups.clone();
            for (rollup, rid) in decl.rollups.iter().zip(rollup_ids) {
                let base_edge = *self.types[owner.idx()]
                    .edge_by_name
                    .get(&rollup.edge)
                    .ok_or_else(|| {
                        GraphError::Schema(format!(
                            "rollup {}.{} over unknown edge {}",
                            decl.name, rollup.name, rollup.edge
                        ))
                    })?;
                if !matches!(self.edges[base_edge.idx()].kind, EdgeKind::Forward { .. }) {
                    return Err(GraphError::Schema(format!(
                        "rollup {}.{} must aggregate a forward edge",
                        decl.name, rollup.name
                    )));
                }
                let target = self.edges[base_edge.idx()].target;

                match rollup.kind {
                    RollupKind::Property => {
                        let compute = rollup.compute.ok_or_else(|| {
                            GraphError::Schema(format!(
                                "property rollup {}.{} needs a compute",
                                decl.name, rollup.name
                            ))
                        })?;
                        let needs_property = matches!(
                            compute,
                            Compute::Sum
                                | Compute::Avg
                                | Compute::Min
                                | Compute::Max
                                | Compute::First
                                | Compute::Last
                        );
                        if needs_property && rollup.property.is_none() {
                            return Err(GraphError::Schema(format!(
                                "rollup {}.{} ({compute:?}) needs a target property",
                                decl.name, rollup.name
                            )));
                        }
                    }
                    RollupKind::Reference | RollupKind::Collection => {
                        if rollup.compute.is_some() || rollup.property.is_some() {
                            return Err(GraphError::Schema(format!(
                                "rollup {}.{} cannot carry compute/property",
                                decl.name, rollup.name
                            )));
                        }
                    }
                }

                let property = rollup
                    .property
                    .as_ref()
                    .map(|p| self.require_prop(target, p))
                    .transpose()?;
                let filters = self.compile_filters(target, &rollup.filters)?;
                let sort = rollup
                    .sort
                    .as_ref()
                    .map(|s| self.compile_sort(target, s))
                    .transpose()?;

                // Filters and sorts must ride an edge index; without either,
                // raw link order serves first/last/reference reads.
                let query = if !filters.is_empty() || sort.is_some() {
                    let fields = self.edge_index_fields(base_edge);
                    let planned = planner::plan(
                        fields.iter().map(|f| f.as_slice()),
                        &filters,
                        sort,
                    );
                    match planned {
                        Some(q) => Some(q),
                        None => {
                            return Err(GraphError::Schema(format!(
                                "rollup {}.{} cannot be served by any edge index",
                                decl.name, rollup.name
                            )))
                        }
                    }
                } else {
                    None
                };

                let output_prop = self.types[owner.idx()]
                    .prop_by_name
                    .get(&rollup.name)
                    .copied()
                    .filter(|_| rollup.kind == RollupKind::Property);

                let derived_edge = if rollup.kind != RollupKind::Property {
                    let did = EdgeDefId(self.edges.len() as u32);
                    self.claim_edge_name(owner, &rollup.name, did)?;
                    let slot = self.types[owner.idx()].edges.len();
                    self.types[owner.idx()].edges.push(did);
                    self.edges.push(EdgeMeta {
                        name: rollup.name.clone(),
                        owner,
                        slot,
                        target,
                        kind: EdgeKind::Derived { rollup: rid },
                    });
                    Some(did)
                } else {
                    None
                };

                if let EdgeKind::Forward { rollups, .. } = &mut self.edges[base_edge.idx()].kind {
                    rollups.push(rid);
                }
                debug_assert_eq!(rid.idx(), self.rollups.len());
                self.rollups.push(RollupMeta {
                    name: rollup.name.clone(),
                    owner,
                    kind: rollup.kind,
                    base_edge,
                    compute: rollup.compute,
                    property,
                    filters,
                    sort,
                    query,
                    output_prop,
                    derived_edge,
                });
            }
        }
        Ok(())
    }

    fn build_dep_tables(&mut self) {
        for (eid, edge) in self.edges.iter().enumerate() {
            if let EdgeKind::Forward { indexes, .. } = &edge.kind {
                for (no, idx) in indexes.iter().enumerate() {
                    for (prop, _) in &idx.fields {
                        self.edge_field_deps
                            .entry((edge.target, *prop))
                            .or_default()
                            .push(EdgeIndexRef {
                                edge: EdgeDefId(eid as u32),
                                index_no: no,
                            });
                    }
                }
            }
        }
        for (rid, rollup) in self.rollups.iter().enumerate() {
            let target = self.edges[rollup.base_edge.idx()].target;
            let mut deps: SmallVec<[PropId; 4]> = SmallVec::new();
            for f in &rollup.filters {
                if !deps.contains(&f.prop) {
                    deps.push(f.prop);
                }
            }
            if let Some(p) = rollup.property {
                if !deps.contains(&p) {
                    deps.push(p);
                }
            }
            if let Some((p, _)) = rollup.sort {
                if !deps.contains(&p) {
                    deps.push(p);
                }
            }
            let table = if rollup.kind == RollupKind::Property {
                &mut self.rollup_prop_deps
            } else {
                &mut self.derived_prop_deps
            };
            for p in deps {
                table
                    .entry((target, p))
                    .or_default()
                    .push(RollupId(rid as u32));
            }
        }
    }

    // ---- lookups ----------------------------------------------------------

    /// Resolves a type name.
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.type_by_name.get(name).copied()
    }

    /// Type name for an id.
    pub fn type_name(&self, ty: TypeId) -> &str {
        &self.types[ty.idx()].name
    }

    pub(crate) fn type_meta(&self, ty: TypeId) -> &TypeMeta {
        &self.types[ty.idx()]
    }

    pub(crate) fn prop_id(&self, ty: TypeId, name: &str) -> Option<PropId> {
        self.types[ty.idx()].prop_by_name.get(name).copied()
    }

    pub(crate) fn require_prop(&self, ty: TypeId, name: &str) -> Result<PropId> {
        self.prop_id(ty, name).ok_or_else(|| {
            GraphError::UnknownProperty(format!("{}.{name}", self.types[ty.idx()].name))
        })
    }

    pub(crate) fn prop_name(&self, ty: TypeId, prop: PropId) -> &str {
        &self.types[ty.idx()].props[prop.idx()].name
    }

    /// Resolves a public edge name on a type.
    pub(crate) fn edge_id(&self, ty: TypeId, name: &str) -> Option<EdgeDefId> {
        self.types[ty.idx()].edge_by_name.get(name).copied()
    }

    pub(crate) fn edge(&self, id: EdgeDefId) -> &EdgeMeta {
        &self.edges[id.idx()]
    }

    pub(crate) fn rollup(&self, id: RollupId) -> &RollupMeta {
        &self.rollups[id.idx()]
    }

    /// Reverse companion of a forward edge.
    pub(crate) fn reverse_of(&self, id: EdgeDefId) -> EdgeDefId {
        match &self.edges[id.idx()].kind {
            EdgeKind::Forward { reverse, .. } => *reverse,
            EdgeKind::Reverse { forward } => *forward,
            EdgeKind::Derived { .. } => id,
        }
    }

    /// Field lists of a forward edge's indexes (empty for reverse/derived).
    pub(crate) fn edge_index_fields(&self, id: EdgeDefId) -> Vec<Vec<(PropId, Dir)>> {
        match &self.edges[id.idx()].kind {
            EdgeKind::Forward { indexes, .. } => {
                indexes.iter().map(|i| i.fields.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn compile_filters(
        &self,
        ty: TypeId,
        filters: &[Filter],
    ) -> Result<Vec<CompiledFilter>> {
        filters
            .iter()
            .map(|f| {
                Ok(CompiledFilter {
                    prop: self.require_prop(ty, &f.field)?,
                    op: f.op,
                    value: f.value.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn compile_sort(&self, ty: TypeId, sort: &Sort) -> Result<(PropId, Dir)> {
        Ok((self.require_prop(ty, &sort.field)?, sort.dir))
    }

    /// Renders filters for the covering-index error message.
    pub(crate) fn render_filters(&self, ty: TypeId, filters: &[CompiledFilter]) -> String {
        filters
            .iter()
            .map(|f| format!("{} {} {}", self.prop_name(ty, f.prop), f.op, f.value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Number of edge slots a node record of `ty` carries.
    pub(crate) fn slot_count(&self, ty: TypeId) -> usize {
        self.types[ty.idx()].edges.len()
    }
}
