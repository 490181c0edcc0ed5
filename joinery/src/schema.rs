//! Schema registry
//!
//! Column metadata comes from the adapter's describe call. The engine stamps
//! each column with its owning table and the alias it will carry inside a
//! query, and keeps the resolved schemas of the root table and every declared
//! relationship together in a [`Catalog`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::Adapter;
use crate::alias;
use crate::command::CommandKind;
use crate::relationship::{Relationship, Relationships};
use crate::{Error, Result, Value};

/// Declared datatype of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Datatype {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Json,
    Bytes,
}

/// Supplier of a column's database default
#[derive(Clone)]
pub struct DefaultValue(Arc<dyn Fn() -> Value + Send + Sync>);

impl DefaultValue {
    pub fn new<F>(supplier: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(supplier))
    }

    pub fn value(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultValue(..)")
    }
}

impl PartialEq for DefaultValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Metadata of a single column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Real name of the owning table
    pub table: String,
    pub field: String,
    /// Name the field carries in reconstructed records
    pub alias: String,
    /// Name the field carries in the flat rows of a compiled query
    pub command_alias: String,
    pub is_primary: bool,
    pub is_identity: bool,
    pub is_virtual: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub datatype: Datatype,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    /// A nullable, non-key column; adapters refine it with the builder methods
    pub fn new(field: impl Into<String>, datatype: Datatype) -> Self {
        let field = field.into();
        Self {
            table: String::new(),
            alias: field.clone(),
            command_alias: field.clone(),
            field,
            is_primary: false,
            is_identity: false,
            is_virtual: false,
            is_nullable: true,
            is_unique: false,
            datatype,
            default_value: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.is_nullable = false;
        self
    }

    /// Values are generated by the database on insert
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    /// Computed by the database; never written
    pub fn virtual_column(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default_value = Some(DefaultValue::new(supplier));
        self
    }

    /// Whether an update may assign this column
    pub fn is_editable(&self) -> bool {
        !self.is_primary && !self.is_virtual
    }
}

/// Columns of one table as seen from one position in the relationship tree
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    table: String,
    table_alias: String,
    path: Vec<String>,
    columns: Vec<ColumnDefinition>,
}

impl Schema {
    /// Stamp described columns with their owner and aliases for `path`
    pub fn new(
        table: &str,
        path: Vec<String>,
        table_alias: &str,
        described: Vec<ColumnDefinition>,
    ) -> Result<Self> {
        let mut columns: Vec<ColumnDefinition> = Vec::with_capacity(described.len());
        for mut column in described {
            alias::validate_name(&column.field, "column")?;
            if columns.iter().any(|c| c.field == column.field) {
                return Err(Error::invalid_query(format!(
                    "table '{}' describes column '{}' twice",
                    table, column.field
                )));
            }
            column.table = table.to_string();
            column.alias = column.field.clone();
            column.command_alias = alias::column_alias(&path, &column.field);
            columns.push(column);
        }

        Ok(Self {
            table: table.to_string(),
            table_alias: table_alias.to_string(),
            path,
            columns,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_alias(&self) -> &str {
        &self.table_alias
    }

    /// Relationship names leading from the query root to this table
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn get(&self, field: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn column(&self, field: &str) -> Result<&ColumnDefinition> {
        self.get(field)
            .ok_or_else(|| Error::column_not_found(&self.table, field))
    }

    pub fn primary_keys(&self) -> Vec<&ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_primary).collect()
    }

    pub fn identity_key(&self) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.is_primary && c.is_identity)
    }

    pub fn has_virtual_columns(&self) -> bool {
        self.columns.iter().any(|c| c.is_virtual)
    }
}

/// Resolved schemas of a query root and all of its declared relationships
#[derive(Debug, Clone)]
pub struct Catalog {
    table: String,
    schema: Arc<Schema>,
    relationships: Relationships,
    described: HashMap<String, Vec<ColumnDefinition>>,
    primary_keys: OnceLock<HashMap<String, Vec<ColumnDefinition>>>,
}

impl Catalog {
    pub(crate) fn new(table: &str, described: Vec<ColumnDefinition>) -> Result<Self> {
        let schema = Schema::new(table, Vec::new(), table, described.clone())?;
        let mut cache = HashMap::new();
        cache.insert(table.to_string(), described);
        Ok(Self {
            table: table.to_string(),
            schema: Arc::new(schema),
            relationships: Relationships::default(),
            described: cache,
            primary_keys: OnceLock::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    /// Schema of the table reached through `path` (empty for the root)
    pub fn schema_at(&self, path: &[String]) -> Result<&Schema> {
        if path.is_empty() {
            return Ok(&self.schema);
        }
        self.relationships
            .resolve(path)
            .ok_or_else(|| Error::relationship_not_found(&self.table, path.join(".")))?
            .schema()
    }

    /// Primary keys of a table, looked up by root name, then declared
    /// relationship name, then real table name. Empty when the table has none.
    pub fn primary_keys(&self, table: &str) -> &[ColumnDefinition] {
        self.primary_keys
            .get_or_init(|| self.index_primary_keys())
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn identity_key(&self, table: &str) -> Option<&ColumnDefinition> {
        self.primary_keys(table).iter().find(|c| c.is_identity)
    }

    fn index_primary_keys(&self) -> HashMap<String, Vec<ColumnDefinition>> {
        fn keys_of(schema: &Schema) -> Vec<ColumnDefinition> {
            schema.primary_keys().into_iter().cloned().collect()
        }

        let mut index = HashMap::new();
        index.insert(self.table.clone(), keys_of(&self.schema));

        let nodes = self.relationships.descendants();
        for relationship in &nodes {
            if let Some(schema) = &relationship.schema {
                index
                    .entry(relationship.name.clone())
                    .or_insert_with(|| keys_of(schema));
            }
        }
        for relationship in &nodes {
            if let Some(schema) = &relationship.schema {
                index
                    .entry(relationship.table.clone())
                    .or_insert_with(|| keys_of(schema));
            }
        }
        index
    }

    /// Resolve the schemas of a freshly declared relationship subtree and
    /// return a catalog that includes it under `parent`.
    ///
    /// Each real table is described at most once per catalog lineage.
    pub(crate) async fn attach<A: Adapter>(
        &self,
        adapter: &A,
        parent: &[String],
        mut relationship: Relationship,
    ) -> Result<Catalog> {
        let mut described = self.described.clone();

        for relative in relationship.walk() {
            let node = relationship.node_mut(&relative).ok_or_else(|| {
                Error::internal(format!(
                    "relationship node {:?} vanished during resolution",
                    relative
                ))
            })?;
            let table = node.table.clone();
            let columns = match described.get(&table) {
                Some(columns) => columns.clone(),
                None => {
                    debug!(table = %table, "joinery.describe");
                    let columns = adapter
                        .describe(&table)
                        .await
                        .map_err(|e| e.at_adapter_boundary(CommandKind::Describe, &table))?;
                    described.insert(table.clone(), columns.clone());
                    columns
                }
            };
            node.schema = Some(Arc::new(Schema::new(
                &table,
                node.path.clone(),
                &node.alias,
                columns,
            )?));
        }

        let mut relationships = self.relationships.clone();
        relationships.attach(&self.table, parent, relationship)?;

        let catalog = Catalog {
            table: self.table.clone(),
            schema: self.schema.clone(),
            relationships,
            described,
            primary_keys: OnceLock::new(),
        };
        catalog.check_shadowing()?;
        Ok(catalog)
    }

    /// A relationship named like a column of its parent makes field
    /// references ambiguous.
    fn check_shadowing(&self) -> Result<()> {
        fn check(schema: &Schema, relationships: &Relationships) -> Result<()> {
            for relationship in relationships.iter() {
                if schema.get(&relationship.name).is_some() {
                    return Err(Error::invalid_query(format!(
                        "relationship '{}' on '{}' has the same name as one of its columns",
                        relationship.name,
                        schema.table()
                    )));
                }
                if let Some(child) = &relationship.schema {
                    check(child, &relationship.relationships)?;
                }
            }
            Ok(())
        }

        check(&self.schema, &self.relationships)
    }
}
