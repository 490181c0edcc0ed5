//! Row reconstruction
//!
//! Joined queries come back as flat rows keyed by command alias, one row per
//! combination of related records. Reconstruction folds them back into
//! nested records: records are deduplicated by primary key at every level,
//! children are matched to parents through a per-level index keyed by the
//! foreign key value, so the work grows with rows times depth rather than
//! with rows squared.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::alias;
use crate::relationship::{RelationshipKind, Relationships};
use crate::schema::Schema;
use crate::{Result, Row, Value};

/// A field of a reconstructed record
#[derive(Debug, Clone, PartialEq)]
pub enum ResultNode {
    Scalar(Value),
    /// A one-to-one relationship; `None` when nothing matched
    Nested(Option<Record>),
    /// A one-to-many relationship
    List(Vec<Record>),
}

impl ResultNode {
    fn is_blank(&self) -> bool {
        match self {
            ResultNode::Scalar(value) => value.is_null(),
            ResultNode::Nested(None) => true,
            ResultNode::Nested(Some(record)) => record.is_blank(),
            ResultNode::List(records) => records.is_empty(),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResultNode::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ResultNode::Scalar(value) => value.to_json(),
            ResultNode::Nested(None) => serde_json::Value::Null,
            ResultNode::Nested(Some(record)) => record.to_json(),
            ResultNode::List(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}

/// A reconstructed record keyed by field name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, ResultNode>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field of a flat row as a scalar
    pub fn from_row(row: Row) -> Self {
        Self(
            row.into_iter()
                .map(|(key, value)| (key, ResultNode::Scalar(value)))
                .collect(),
        )
    }

    pub fn insert(&mut self, field: impl Into<String>, node: ResultNode) {
        self.0.insert(field.into(), node);
    }

    pub fn get(&self, field: &str) -> Option<&ResultNode> {
        self.0.get(field)
    }

    /// Scalar value of a field
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(ResultNode::as_value)
    }

    /// Record of a one-to-one relationship
    pub fn nested(&self, field: &str) -> Option<&Record> {
        match self.get(field)? {
            ResultNode::Nested(record) => record.as_ref(),
            _ => None,
        }
    }

    /// Records of a one-to-many relationship
    pub fn list(&self, field: &str) -> Option<&[Record]> {
        match self.get(field)? {
            ResultNode::List(records) => Some(records),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultNode)> {
        self.0.iter()
    }

    /// Every field null, absent or empty
    pub fn is_blank(&self) -> bool {
        self.0.values().all(ResultNode::is_blank)
    }

    /// Scalar fields only, as a flat row
    pub fn into_row(self) -> Row {
        self.0
            .into_iter()
            .filter_map(|(field, node)| match node {
                ResultNode::Scalar(value) => Some((field, value)),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(field, node)| (field.clone(), node.to_json()))
                .collect(),
        )
    }
}

impl Serialize for ResultNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ResultNode::Scalar(value) => value.to_json().serialize(serializer),
            ResultNode::Nested(None) => serializer.serialize_none(),
            ResultNode::Nested(Some(record)) => record.serialize(serializer),
            ResultNode::List(records) => records.serialize(serializer),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, node) in &self.0 {
            map.serialize_entry(field, node)?;
        }
        map.end()
    }
}

/// Work counters of one reconstruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructStats {
    /// Rows visited, summed over every level
    pub rows_scanned: usize,
    /// Rows added to foreign key indexes
    pub index_inserts: usize,
    /// Parent records looked up in a foreign key index
    pub index_lookups: usize,
    /// Deepest level reached, the root being 1
    pub depth: usize,
}

/// Hashable view of a key value; integer widths compare equal, floats
/// compare by bit pattern
#[derive(Debug, Clone, Copy)]
struct KeyValue<'a>(&'a Value);

impl PartialEq for KeyValue<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.0, other.0) {
            (Value::F32(_) | Value::F64(_), Value::F32(_) | Value::F64(_)) => {
                float_bits(self.0) == float_bits(other.0)
            }
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => match (a, b) {
                    (Value::Array(a), Value::Array(b)) => {
                        a.len() == b.len()
                            && a.iter().zip(b).all(|(a, b)| KeyValue(a) == KeyValue(b))
                    }
                    (a, b) => a == b,
                },
            },
        }
    }
}

impl Eq for KeyValue<'_> {}

impl Hash for KeyValue<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => (1u8, b).hash(state),
            Value::I32(_) | Value::I64(_) => (2u8, self.0.as_i64()).hash(state),
            Value::F32(_) | Value::F64(_) => (3u8, float_bits(self.0)).hash(state),
            Value::String(s) => (4u8, s).hash(state),
            Value::Bytes(b) => (5u8, b).hash(state),
            Value::Json(j) => (6u8, j.to_string()).hash(state),
            Value::Date(d) => (7u8, d).hash(state),
            Value::Array(values) => {
                8u8.hash(state);
                values.len().hash(state);
                for value in values {
                    KeyValue(value).hash(state);
                }
            }
        }
    }
}

fn float_bits(value: &Value) -> Option<u64> {
    match value {
        Value::F32(f) => Some(f64::from(*f).to_bits()),
        Value::F64(f) => Some(f.to_bits()),
        _ => None,
    }
}

/// How one table's columns are read out of a row
#[derive(Debug)]
struct TablePlan {
    /// (command alias, field)
    columns: Vec<(String, String)>,
    /// Aliases that identify a record of this table
    key: Vec<String>,
    children: Vec<ChildPlan>,
}

#[derive(Debug)]
struct ChildPlan {
    name: String,
    kind: RelationshipKind,
    /// Alias of the parent side key
    parent_key: String,
    /// Alias of the child side key
    child_key: String,
    plan: TablePlan,
}

impl TablePlan {
    fn new(schema: &Schema, relationships: &Relationships) -> Result<TablePlan> {
        let columns: Vec<(String, String)> = schema
            .columns()
            .iter()
            .map(|c| (c.command_alias.clone(), c.field.clone()))
            .collect();
        let primary: Vec<String> = schema
            .primary_keys()
            .iter()
            .map(|c| c.command_alias.clone())
            .collect();
        let key = if primary.is_empty() {
            columns.iter().map(|(alias, _)| alias.clone()).collect()
        } else {
            primary
        };

        let mut children = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            children.push(ChildPlan {
                name: relationship.name.clone(),
                kind: relationship.kind,
                parent_key: relationship.primary_key.command_alias.clone(),
                child_key: relationship.foreign_key.command_alias.clone(),
                plan: TablePlan::new(relationship.schema()?, &relationship.relationships)?,
            });
        }

        Ok(TablePlan {
            columns,
            key,
            children,
        })
    }

    fn project(&self, row: &Row) -> Record {
        let mut record = Record::new();
        for (alias, field) in &self.columns {
            if let Some(value) = row.get(alias) {
                record.insert(field.clone(), ResultNode::Scalar(value.clone()));
            }
        }
        record
    }

    fn touches(&self, row: &Row) -> bool {
        self.columns.iter().any(|(alias, _)| row.contains_key(alias))
            || self.children.iter().any(|child| child.plan.touches(row))
    }

    /// One record per row, children projected from the same row
    fn project_grouped(&self, row: &Row) -> Record {
        let mut record = self.project(row);
        for child in &self.children {
            if !child.plan.touches(row) {
                continue;
            }
            let nested = child.plan.project_grouped(row);
            let node = match child.kind {
                RelationshipKind::OneToOne => {
                    ResultNode::Nested((!nested.is_blank()).then_some(nested))
                }
                RelationshipKind::OneToMany if nested.is_blank() => ResultNode::Scalar(Value::Null),
                RelationshipKind::OneToMany => ResultNode::List(vec![nested]),
            };
            record.insert(child.name.clone(), node);
        }
        record
    }
}

impl ChildPlan {
    fn attach(&self, records: Vec<Record>) -> ResultNode {
        match self.kind {
            RelationshipKind::OneToOne => ResultNode::Nested(records.into_iter().next()),
            RelationshipKind::OneToMany => ResultNode::List(records),
        }
    }
}

fn copy_aggregates(row: &Row, record: &mut Record) {
    for (alias, value) in row.iter().filter(|(alias, _)| alias::is_aggregate(alias)) {
        record.insert(alias.clone(), ResultNode::Scalar(value.clone()));
    }
}

fn build_level<'a>(
    rows: &[&'a Row],
    plan: &TablePlan,
    stats: &mut ReconstructStats,
    depth: usize,
) -> Vec<Record> {
    stats.depth = stats.depth.max(depth);
    stats.rows_scanned += rows.len();

    let mut seen: HashSet<Vec<KeyValue<'a>>> = HashSet::with_capacity(rows.len());
    let mut unique: Vec<&'a Row> = Vec::new();
    for &row in rows {
        let key: Vec<KeyValue<'a>> = plan
            .key
            .iter()
            .map(|alias| KeyValue(row.get(alias).unwrap_or(&Value::Null)))
            .collect();
        if seen.insert(key) {
            unique.push(row);
        }
    }

    let mut indexes: Vec<HashMap<KeyValue<'a>, Vec<&'a Row>>> =
        Vec::with_capacity(plan.children.len());
    for child in &plan.children {
        let mut index: HashMap<KeyValue<'a>, Vec<&'a Row>> = HashMap::new();
        for &row in rows {
            if let Some(value) = row.get(&child.child_key).filter(|v| !v.is_null()) {
                stats.index_inserts += 1;
                index.entry(KeyValue(value)).or_default().push(row);
            }
        }
        indexes.push(index);
    }

    let mut records = Vec::with_capacity(unique.len());
    for row in unique {
        let mut record = plan.project(row);
        for (child, index) in plan.children.iter().zip(&indexes) {
            let related: &[&'a Row] = match row.get(&child.parent_key).filter(|v| !v.is_null()) {
                Some(value) => {
                    stats.index_lookups += 1;
                    index.get(&KeyValue(value)).map(Vec::as_slice).unwrap_or(&[])
                }
                None => &[],
            };
            let nested = if related.is_empty() {
                Vec::new()
            } else {
                build_level(related, &child.plan, stats, depth + 1)
            };
            record.insert(child.name.clone(), child.attach(nested));
        }
        if depth == 1 {
            copy_aggregates(row, &mut record);
        }
        if !record.is_blank() {
            records.push(record);
        }
    }
    records
}

fn build_grouped(rows: &[Row], plan: &TablePlan, stats: &mut ReconstructStats) -> Vec<Record> {
    stats.depth = 1;
    // One record per group, even when every value in it is NULL
    rows.iter()
        .map(|row| {
            stats.rows_scanned += 1;
            let mut record = plan.project_grouped(row);
            copy_aggregates(row, &mut record);
            record
        })
        .collect()
}

/// Fold flat rows into nested records
///
/// `relationships` must hold only the included relationships, with their
/// schemas resolved. Rows of queries without joins come back unchanged.
pub fn reconstruct(
    rows: Vec<Row>,
    is_grouped: bool,
    is_joined: bool,
    schema: &Schema,
    relationships: &Relationships,
) -> Result<Vec<Record>> {
    reconstruct_with_stats(rows, is_grouped, is_joined, schema, relationships)
        .map(|(records, _)| records)
}

/// [`reconstruct`], also reporting how much work it did
pub fn reconstruct_with_stats(
    rows: Vec<Row>,
    is_grouped: bool,
    is_joined: bool,
    schema: &Schema,
    relationships: &Relationships,
) -> Result<(Vec<Record>, ReconstructStats)> {
    let mut stats = ReconstructStats::default();
    if !is_joined {
        stats.rows_scanned = rows.len();
        stats.depth = 1;
        return Ok((rows.into_iter().map(Record::from_row).collect(), stats));
    }

    let plan = TablePlan::new(schema, relationships)?;
    let records = if is_grouped {
        build_grouped(&rows, &plan, &mut stats)
    } else {
        let refs: Vec<&Row> = rows.iter().collect();
        build_level(&refs, &plan, &mut stats, 1)
    };
    Ok((records, stats))
}
