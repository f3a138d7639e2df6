//! Staging table specs and the dependency graph between them
//!
//! Each staging table is a projection of one upstream table, rebuilt from
//! scratch on every run. The plan keeps the upstream relation as an
//! explicit DAG so that staging tables may themselves feed further tables.

use crate::catalog::{ColumnSpec, TableDefinition};
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A normalized table populated by projecting columns from `source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingTableSpec {
    pub table: TableDefinition,
    /// Qualified name of the upstream table
    pub source: String,
}

impl StagingTableSpec {
    pub fn new(table: TableDefinition, source: impl Into<String>) -> Self {
        Self {
            table,
            source: source.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        self.table.qualified_name()
    }

    /// Columns selected from the source, in target order
    pub fn projection(&self) -> Vec<&str> {
        self.table.column_names()
    }
}

/// Node in the staging graph
#[derive(Debug, Clone)]
enum PlanNode {
    /// A table the plan reads but does not build
    Source(String),
    Staging(StagingTableSpec),
}

/// Dependency graph of staging tables
///
/// Edges run from an upstream table to the staging table built from it.
#[derive(Debug, Default)]
pub struct StagingPlan {
    graph: DiGraph<PlanNode, ()>,
    by_name: HashMap<String, NodeIndex>,
}

impl StagingPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a staging spec and its edge from the upstream table.
    ///
    /// A spec may name a table that was earlier seen only as a source; the
    /// node is then promoted to a staging node.
    pub fn add(&mut self, spec: StagingTableSpec) -> Result<()> {
        let name = spec.qualified_name();
        if name == spec.source {
            return Err(Error::Graph(format!("{} cannot be staged from itself", name)));
        }

        let upstream = self.node_for(&spec.source);

        let target = match self.by_name.get(&name).copied() {
            Some(idx) => match &self.graph[idx] {
                PlanNode::Staging(_) => {
                    return Err(Error::Graph(format!("duplicate staging table {}", name)));
                }
                PlanNode::Source(_) => {
                    self.graph[idx] = PlanNode::Staging(spec);
                    idx
                }
            },
            None => {
                let idx = self.graph.add_node(PlanNode::Staging(spec));
                self.by_name.insert(name, idx);
                idx
            }
        };

        self.graph.add_edge(upstream, target, ());
        Ok(())
    }

    fn node_for(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(PlanNode::Source(name.to_string()));
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    /// Staging specs in an order where every upstream precedes its dependents
    pub fn execution_order(&self) -> Result<Vec<&StagingTableSpec>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            Error::Graph(format!(
                "circular staging dependency through {}",
                self.node_name(cycle.node_id())
            ))
        })?;

        Ok(order
            .into_iter()
            .filter_map(|idx| match &self.graph[idx] {
                PlanNode::Staging(spec) => Some(spec),
                PlanNode::Source(_) => None,
            })
            .collect())
    }

    /// Tables read by the plan that it does not build itself
    pub fn external_sources(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .filter_map(|idx| match &self.graph[idx] {
                PlanNode::Source(name) => Some(name.as_str()),
                PlanNode::Staging(_) => None,
            })
            .collect()
    }

    /// Staging tables built directly from `name`
    pub fn dependents(&self, name: &str) -> Vec<&StagingTableSpec> {
        let Some(&idx) = self.by_name.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|child| match &self.graph[child] {
                PlanNode::Staging(spec) => Some(spec),
                PlanNode::Source(_) => None,
            })
            .collect()
    }

    /// Longest chain of staging tables from an external source
    pub fn depth(&self) -> Result<usize> {
        let order = toposort(&self.graph, None)
            .map_err(|_| Error::Graph("circular staging dependency".to_string()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut deepest = 0;
        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|parent| depth.get(&parent).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, level);
            deepest = deepest.max(level);
        }
        Ok(deepest)
    }

    pub fn len(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|n| matches!(n, PlanNode::Staging(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node_name(&self, idx: NodeIndex) -> String {
        match &self.graph[idx] {
            PlanNode::Source(name) => name.clone(),
            PlanNode::Staging(spec) => spec.qualified_name(),
        }
    }
}

/// The six normalized product hierarchy tables, each projected from `source`
pub fn hierarchy_staging_plan(schema: &str, source: &str) -> Result<StagingPlan> {
    let tables: [(&str, Vec<ColumnSpec>); 6] = [
        (
            "product_tbl",
            vec![
                ColumnSpec::varchar("sku_id"),
                ColumnSpec::varchar("sku_label"),
                ColumnSpec::varchar("stylclr_id"),
                ColumnSpec::varchar("styl_id"),
                ColumnSpec::varchar("subcat_id"),
                ColumnSpec::integer("issvc"),
                ColumnSpec::integer("isasmbly"),
                ColumnSpec::integer("isnfs"),
            ],
        ),
        (
            "style_tbl",
            vec![ColumnSpec::varchar("styl_id"), ColumnSpec::varchar("styl_label")],
        ),
        (
            "styleclr_tbl",
            vec![
                ColumnSpec::varchar("stylclr_id"),
                ColumnSpec::varchar("stylclr_label"),
            ],
        ),
        (
            "subcategory_tbl",
            vec![
                ColumnSpec::varchar("subcat_id"),
                ColumnSpec::varchar("subcat_label"),
                ColumnSpec::varchar("cat_id"),
            ],
        ),
        (
            "category_tbl",
            vec![
                ColumnSpec::varchar("cat_id"),
                ColumnSpec::varchar("cat_label"),
                ColumnSpec::varchar("dept_id"),
            ],
        ),
        (
            "dept_tbl",
            vec![ColumnSpec::varchar("dept_id"), ColumnSpec::varchar("dept_label")],
        ),
    ];

    let mut plan = StagingPlan::new();
    for (name, columns) in tables {
        plan.add(StagingTableSpec::new(
            TableDefinition::new(schema, name, columns),
            source,
        ))?;
    }
    Ok(plan)
}
