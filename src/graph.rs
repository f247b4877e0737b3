//! In-memory labeled property graph with a pattern-matching evaluator.
//!
//! Nodes and relationships live in append-only arenas with monotonically
//! increasing ids starting at 1. Deletion is not supported; the coordinator
//! rebuilds the store from the chunk catalog after file changes. A query is
//! parsed in full before anything executes, so a syntax error never leaves
//! partial writes behind.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::query::{
    self, CmpOp, Expr, FunctionArg, NodePattern, PatternChain, Projection, PropValue, QueryError,
    RelPattern, ReturnClause, Statement, StrOp,
};
use crate::types::Chunk;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// A query result row: column name -> projected value.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: u64,
    pub labels: Vec<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphRelationship {
    pub id: u64,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from: u64,
    pub to: u64,
    pub properties: Map<String, Value>,
}

/// Read-only export of the store for visualizers; `content` properties are
/// omitted.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),
}

/// What a pattern variable is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Node(u64),
    Rel(u64),
}

type Bindings = HashMap<String, Binding>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct GraphStore {
    nodes: Vec<GraphNode>,
    relationships: Vec<GraphRelationship>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore { nodes: Vec::new(), relationships: Vec::new(), next_node_id: 1, next_rel_id: 1 }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Parse and execute `query`; semicolon-separated statements run in
    /// order and the last statement's rows are returned.
    pub fn run(&mut self, query_text: &str) -> Result<Vec<Row>, GraphError> {
        let statements = query::parse(query_text)?;
        let mut rows = Vec::new();
        for statement in statements {
            rows = self.execute(&statement)?;
        }
        Ok(rows)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let mut node = n.clone();
                node.properties.remove("content");
                node
            })
            .collect();
        GraphSnapshot { nodes, relationships: self.relationships.clone() }
    }

    fn node(&self, id: u64) -> Option<&GraphNode> {
        // ids are dense and start at 1
        self.nodes.get((id as usize).checked_sub(1)?)
    }

    fn relationship(&self, id: u64) -> Option<&GraphRelationship> {
        self.relationships.get((id as usize).checked_sub(1)?)
    }

    // -- execution ----------------------------------------------------------

    fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, GraphError> {
        match statement {
            Statement::Create { patterns, filter, ret } => {
                let binding = self.exec_create(patterns)?;
                let mut bindings = vec![binding];
                if let Some(expr) = filter {
                    bindings.retain(|b| truthy(&self.eval_expr(expr, b)));
                }
                self.project(ret.as_ref(), bindings)
            }
            Statement::Match { patterns, filter, ret } => {
                let mut bindings = vec![Bindings::new()];
                for chain in patterns {
                    bindings = self.match_chain(chain, bindings);
                }
                if let Some(expr) = filter {
                    bindings.retain(|b| truthy(&self.eval_expr(expr, b)));
                }
                self.project(ret.as_ref(), bindings)
            }
            Statement::Call { procedure } => self.call_procedure(procedure),
        }
    }

    fn call_procedure(&self, procedure: &str) -> Result<Vec<Row>, GraphError> {
        if procedure != "db.labels" {
            return Err(GraphError::UnknownProcedure(procedure.to_string()));
        }
        let labels: BTreeSet<&str> =
            self.nodes.iter().flat_map(|n| n.labels.iter().map(|l| l.as_str())).collect();
        Ok(labels
            .into_iter()
            .map(|label| {
                let mut row = Row::new();
                row.insert("label".to_string(), Value::from(label));
                row
            })
            .collect())
    }

    // -- CREATE -------------------------------------------------------------

    fn exec_create(&mut self, patterns: &[PatternChain]) -> Result<Bindings, GraphError> {
        let mut binding = Bindings::new();
        for chain in patterns {
            let mut left = self.create_or_reuse(&chain.start, &mut binding);
            for (rel_pat, node_pat) in &chain.links {
                let right = self.create_or_reuse(node_pat, &mut binding);
                let properties = self.resolve_props(&rel_pat.props, &binding);
                let id = self.next_rel_id;
                self.next_rel_id += 1;
                self.relationships.push(GraphRelationship {
                    id,
                    rel_type: rel_pat.rel_type.clone().unwrap_or_default(),
                    from: left,
                    to: right,
                    properties,
                });
                if let Some(var) = &rel_pat.var {
                    binding.insert(var.clone(), Binding::Rel(id));
                }
                left = right;
            }
        }
        Ok(binding)
    }

    /// Instantiate a node pattern, or reuse the node a variable is already
    /// bound to (so `(a:X), (b:X), (a)-[:R]->(b)` wires up existing nodes).
    fn create_or_reuse(&mut self, pattern: &NodePattern, binding: &mut Bindings) -> u64 {
        if let Some(var) = &pattern.var {
            if let Some(Binding::Node(id)) = binding.get(var) {
                return *id;
            }
        }
        let properties = self.resolve_props(&pattern.props, binding);
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.push(GraphNode { id, labels: pattern.labels.clone(), properties });
        if let Some(var) = &pattern.var {
            binding.insert(var.clone(), Binding::Node(id));
        }
        id
    }

    /// Materialize an inline property map against the current bindings.
    fn resolve_props(
        &self,
        props: &[(String, PropValue)],
        binding: &Bindings,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in props {
            out.insert(key.clone(), self.resolve_prop_value(value, binding));
        }
        out
    }

    fn resolve_prop_value(&self, value: &PropValue, binding: &Bindings) -> Value {
        match value {
            PropValue::Literal(v) => v.clone(),
            PropValue::Ref { var, prop } => self.entity_property(binding.get(var), prop),
        }
    }

    fn entity_property(&self, bound: Option<&Binding>, prop: &str) -> Value {
        match bound {
            Some(Binding::Node(id)) => self
                .node(*id)
                .and_then(|n| n.properties.get(prop).cloned())
                .unwrap_or(Value::Null),
            Some(Binding::Rel(id)) => self
                .relationship(*id)
                .and_then(|r| r.properties.get(prop).cloned())
                .unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    // -- MATCH --------------------------------------------------------------

    fn match_chain(&self, chain: &PatternChain, input: Vec<Bindings>) -> Vec<Bindings> {
        let mut out = Vec::new();
        for binding in input {
            for (start_id, start_binding) in self.match_node(&chain.start, &binding) {
                let mut states = vec![(start_id, start_binding)];
                for (rel_pat, node_pat) in &chain.links {
                    let mut next = Vec::new();
                    for (left, b) in &states {
                        for rel in self.relationships.iter().filter(|r| r.from == *left) {
                            if !self.rel_matches(rel_pat, rel, b) {
                                continue;
                            }
                            for (right, mut b2) in self.match_node_at(node_pat, rel.to, b) {
                                if let Some(var) = &rel_pat.var {
                                    match b2.get(var) {
                                        Some(Binding::Rel(id)) if *id == rel.id => {}
                                        Some(_) => continue,
                                        None => {
                                            b2.insert(var.clone(), Binding::Rel(rel.id));
                                        }
                                    }
                                }
                                next.push((right, b2));
                            }
                        }
                    }
                    states = next;
                }
                out.extend(states.into_iter().map(|(_, b)| b));
            }
        }
        out
    }

    /// All nodes satisfying `pattern` under `binding`, with the variable
    /// (if any) bound. An already-bound variable is never contradicted.
    fn match_node(&self, pattern: &NodePattern, binding: &Bindings) -> Vec<(u64, Bindings)> {
        if let Some(var) = &pattern.var {
            match binding.get(var) {
                Some(Binding::Node(id)) => {
                    return match self.node(*id) {
                        Some(node) if self.node_satisfies(pattern, node, binding) => {
                            vec![(*id, binding.clone())]
                        }
                        _ => Vec::new(),
                    };
                }
                Some(Binding::Rel(_)) => return Vec::new(),
                None => {}
            }
        }
        self.nodes
            .iter()
            .filter(|node| self.node_satisfies(pattern, node, binding))
            .map(|node| {
                let mut b = binding.clone();
                if let Some(var) = &pattern.var {
                    b.insert(var.clone(), Binding::Node(node.id));
                }
                (node.id, b)
            })
            .collect()
    }

    /// Like [`match_node`](Self::match_node) but for a fixed candidate node.
    fn match_node_at(
        &self,
        pattern: &NodePattern,
        candidate: u64,
        binding: &Bindings,
    ) -> Vec<(u64, Bindings)> {
        let Some(node) = self.node(candidate) else {
            return Vec::new();
        };
        if let Some(var) = &pattern.var {
            match binding.get(var) {
                Some(Binding::Node(id)) if *id != candidate => return Vec::new(),
                Some(Binding::Rel(_)) => return Vec::new(),
                _ => {}
            }
        }
        if !self.node_satisfies(pattern, node, binding) {
            return Vec::new();
        }
        let mut b = binding.clone();
        if let Some(var) = &pattern.var {
            b.insert(var.clone(), Binding::Node(candidate));
        }
        vec![(candidate, b)]
    }

    fn node_satisfies(&self, pattern: &NodePattern, node: &GraphNode, binding: &Bindings) -> bool {
        pattern.labels.iter().all(|l| node.labels.iter().any(|nl| nl == l))
            && pattern.props.iter().all(|(key, value)| {
                let expected = self.resolve_prop_value(value, binding);
                node.properties.get(key).is_some_and(|actual| value_eq(actual, &expected))
            })
    }

    fn rel_matches(&self, pattern: &RelPattern, rel: &GraphRelationship, binding: &Bindings) -> bool {
        if let Some(t) = &pattern.rel_type {
            if &rel.rel_type != t {
                return false;
            }
        }
        pattern.props.iter().all(|(key, value)| {
            let expected = self.resolve_prop_value(value, binding);
            rel.properties.get(key).is_some_and(|actual| value_eq(actual, &expected))
        })
    }

    // -- expressions --------------------------------------------------------

    fn eval_expr(&self, expr: &Expr, binding: &Bindings) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Prop { var, prop } => self.entity_property(binding.get(var), prop),
            Expr::Variable(var) => self.bound_value(binding.get(var)),
            Expr::Not(inner) => Value::Bool(!truthy(&self.eval_expr(inner, binding))),
            Expr::And(lhs, rhs) => Value::Bool(
                truthy(&self.eval_expr(lhs, binding)) && truthy(&self.eval_expr(rhs, binding)),
            ),
            Expr::Or(lhs, rhs) => Value::Bool(
                truthy(&self.eval_expr(lhs, binding)) || truthy(&self.eval_expr(rhs, binding)),
            ),
            Expr::Cmp { op, lhs, rhs } => {
                let l = self.eval_expr(lhs, binding);
                let r = self.eval_expr(rhs, binding);
                Value::Bool(compare(*op, &l, &r))
            }
            Expr::StrTest { op, lhs, rhs } => {
                let l = self.eval_expr(lhs, binding);
                let r = self.eval_expr(rhs, binding);
                // non-string operands always fail the test
                let result = match (l.as_str(), r.as_str()) {
                    (Some(l), Some(r)) => match op {
                        StrOp::StartsWith => l.starts_with(r),
                        StrOp::EndsWith => l.ends_with(r),
                        StrOp::Contains => l.contains(r),
                    },
                    _ => false,
                };
                Value::Bool(result)
            }
        }
    }

    /// Project a bound variable to its row value: a node or relationship
    /// object, or `Null` when unbound.
    fn bound_value(&self, bound: Option<&Binding>) -> Value {
        match bound {
            Some(Binding::Node(id)) => match self.node(*id) {
                Some(node) => node_value(node),
                None => Value::Null,
            },
            Some(Binding::Rel(id)) => match self.relationship(*id) {
                Some(rel) => rel_value(rel),
                None => Value::Null,
            },
            None => Value::Null,
        }
    }

    // -- RETURN -------------------------------------------------------------

    fn project(
        &self,
        ret: Option<&ReturnClause>,
        bindings: Vec<Bindings>,
    ) -> Result<Vec<Row>, GraphError> {
        let Some(ret) = ret else {
            return Ok(Vec::new());
        };

        let mut aggregate = false;
        for item in &ret.items {
            if let Projection::Function { name, .. } = &item.projection {
                match name.to_ascii_lowercase().as_str() {
                    "count" | "collect" => aggregate = true,
                    "labels" => {}
                    _ => return Err(GraphError::UnsupportedFunction(name.clone())),
                }
            }
        }

        let mut rows: Vec<Row> = if aggregate {
            let mut row = Row::new();
            for item in &ret.items {
                row.insert(item.column_name(), self.aggregate_value(item, &bindings));
            }
            vec![row]
        } else {
            bindings
                .iter()
                .map(|binding| {
                    let mut row = Row::new();
                    for item in &ret.items {
                        row.insert(
                            item.column_name(),
                            self.scalar_value(&item.projection, binding),
                        );
                    }
                    row
                })
                .collect()
        };

        if ret.distinct {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(canonical_key(row)));
        }

        if !ret.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for sort in &ret.order_by {
                    let av = a.get(&sort.key).unwrap_or(&Value::Null);
                    let bv = b.get(&sort.key).unwrap_or(&Value::Null);
                    let ord = order_values(av, bv);
                    if ord != std::cmp::Ordering::Equal {
                        return if sort.descending { ord.reverse() } else { ord };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = ret.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    fn scalar_value(&self, projection: &Projection, binding: &Bindings) -> Value {
        match projection {
            Projection::Variable(var) => self.bound_value(binding.get(var)),
            Projection::Property { var, prop } => self.entity_property(binding.get(var), prop),
            Projection::Function { name, arg } => {
                // only `labels` reaches here; aggregates take the other path
                debug_assert!(name.eq_ignore_ascii_case("labels"));
                match arg {
                    FunctionArg::Variable(var) => match binding.get(var) {
                        Some(Binding::Node(id)) => match self.node(*id) {
                            Some(node) => Value::from(node.labels.clone()),
                            None => Value::Null,
                        },
                        _ => Value::Null,
                    },
                    FunctionArg::Star => Value::Null,
                }
            }
        }
    }

    fn aggregate_value(&self, item: &crate::query::ReturnItem, bindings: &[Bindings]) -> Value {
        match &item.projection {
            Projection::Function { name, arg } => match name.to_ascii_lowercase().as_str() {
                "count" => match arg {
                    FunctionArg::Star => Value::from(bindings.len()),
                    FunctionArg::Variable(var) => {
                        let n = bindings
                            .iter()
                            .filter(|b| !self.bound_value(b.get(var)).is_null())
                            .count();
                        Value::from(n)
                    }
                },
                "collect" => match arg {
                    FunctionArg::Star => Value::Array(Vec::new()),
                    FunctionArg::Variable(var) => Value::Array(
                        bindings
                            .iter()
                            .map(|b| self.bound_value(b.get(var)))
                            .filter(|v| !v.is_null())
                            .collect(),
                    ),
                },
                // labels() in an aggregate row reads the first binding
                _ => match bindings.first() {
                    Some(binding) => self.scalar_value(&item.projection, binding),
                    None => Value::Null,
                },
            },
            other => match bindings.first() {
                Some(binding) => self.scalar_value(other, binding),
                None => Value::Null,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn node_value(node: &GraphNode) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_string(), Value::from(node.id));
    obj.insert("labels".to_string(), Value::from(node.labels.clone()));
    obj.insert("properties".to_string(), Value::Object(node.properties.clone()));
    Value::Object(obj)
}

fn rel_value(rel: &GraphRelationship) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_string(), Value::from(rel.id));
    obj.insert("type".to_string(), Value::from(rel.rel_type.clone()));
    obj.insert("from".to_string(), Value::from(rel.from));
    obj.insert("to".to_string(), Value::from(rel.to));
    obj.insert("properties".to_string(), Value::Object(rel.properties.clone()));
    Value::Object(obj)
}

/// Deep equality with numeric coercion, so `2` equals `2.0`.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        CmpOp::Eq => value_eq(lhs, rhs),
        CmpOp::Ne => !value_eq(lhs, rhs),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = match (lhs, rhs) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(a), Some(b)) => match a.partial_cmp(&b) {
                        Some(ord) => ord,
                        None => return false,
                    },
                    _ => return false,
                },
            };
            match op {
                CmpOp::Lt => ord == std::cmp::Ordering::Less,
                CmpOp::Le => ord != std::cmp::Ordering::Greater,
                CmpOp::Gt => ord == std::cmp::Ordering::Greater,
                CmpOp::Ge => ord != std::cmp::Ordering::Less,
                _ => false,
            }
        }
    }
}

/// Deduplication key for `DISTINCT`: primitives compare directly through
/// their JSON form; complex values are stringified the same way.
fn canonical_key(row: &Row) -> String {
    serde_json::to_string(&Value::Object(row.clone())).unwrap_or_default()
}

/// Sort order for `ORDER BY`: numbers numerically, strings lexically,
/// mixed/complex values through their stringified form.
fn order_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Row -> chunk mapping
// ---------------------------------------------------------------------------

/// Deeply scan query rows and resolve them back to catalog chunks: node
/// values labeled `Chunk` resolve through their `id` property, strings
/// resolve as raw chunk ids or as file paths of file chunks.
pub fn rows_to_chunks(rows: &[Row], catalog: &[Chunk]) -> Vec<Chunk> {
    let by_id: HashMap<&str, &Chunk> = catalog.iter().map(|c| (c.id.as_str(), c)).collect();
    let file_by_path: HashMap<&str, &Chunk> =
        catalog.iter().filter(|c| c.is_file()).map(|c| (c.file_path.as_str(), c)).collect();

    let mut out: Vec<Chunk> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    fn scan(
        value: &Value,
        by_id: &HashMap<&str, &Chunk>,
        file_by_path: &HashMap<&str, &Chunk>,
        seen: &mut HashSet<String>,
        out: &mut Vec<Chunk>,
    ) {
        match value {
            Value::Object(obj) => {
                let is_chunk_node = obj
                    .get("labels")
                    .and_then(|l| l.as_array())
                    .is_some_and(|labels| labels.iter().any(|l| l == "Chunk"));
                if is_chunk_node {
                    if let Some(id) = obj
                        .get("properties")
                        .and_then(|p| p.get("id"))
                        .and_then(|v| v.as_str())
                    {
                        if let Some(chunk) = by_id.get(id) {
                            if seen.insert(chunk.id.clone()) {
                                out.push((*chunk).clone());
                            }
                        }
                    }
                } else {
                    for v in obj.values() {
                        scan(v, by_id, file_by_path, seen, out);
                    }
                }
            }
            Value::Array(values) => {
                for v in values {
                    scan(v, by_id, file_by_path, seen, out);
                }
            }
            Value::String(s) => {
                let found = by_id.get(s.as_str()).or_else(|| file_by_path.get(s.as_str()));
                if let Some(chunk) = found {
                    if seen.insert(chunk.id.clone()) {
                        out.push((*chunk).clone());
                    }
                }
            }
            _ => {}
        }
    }

    for row in rows {
        for value in row.values() {
            scan(value, &by_id, &file_by_path, &mut seen, &mut out);
        }
    }

    debug!(rows = rows.len(), chunks = out.len(), "rows resolved to chunks");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
