//! Relationship graph
//!
//! Relationships are declared on a context with [`Declaration`] values and
//! form a tree rooted at the context's table. Every node knows the path of
//! relationship names leading to it, the alias of the table it joins, and the
//! key columns on both sides of the join. Schemas are filled in once the
//! readiness chain has described the related tables.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::alias;
use crate::schema::Schema;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// At most one related record; reconstructed as a nested object
    OneToOne,
    /// Any number of related records; reconstructed as a list
    OneToMany,
}

/// One side of a join condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub table_alias: String,
    pub field: String,
    pub command_alias: String,
}

/// A node of the relationship tree
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Declared name, unique among its siblings
    pub name: String,
    pub kind: RelationshipKind,
    /// Real name of the related table
    pub table: String,
    /// Alias of the related table inside a query
    pub alias: String,
    /// Names from the query root down to and including this node
    pub path: Vec<String>,
    /// Key on the parent side of the join
    pub primary_key: KeyRef,
    /// Key on this side of the join
    pub foreign_key: KeyRef,
    /// Filled in by the readiness chain
    pub schema: Option<Arc<Schema>>,
    pub relationships: Relationships,
}

impl Relationship {
    pub fn schema(&self) -> Result<&Schema> {
        self.schema.as_deref().ok_or_else(|| {
            Error::internal(format!(
                "schema of relationship '{}' has not been resolved",
                self.name
            ))
        })
    }

    /// Paths relative to this node of every node in its subtree, this node
    /// (the empty path) first.
    pub(crate) fn walk(&self) -> Vec<Vec<String>> {
        let mut paths = vec![Vec::new()];
        let mut stack: Vec<(Vec<String>, &Relationship)> = vec![(Vec::new(), self)];
        while let Some((prefix, node)) = stack.pop() {
            for child in node.relationships.iter().rev() {
                let mut path = prefix.clone();
                path.push(child.name.clone());
                stack.push((path, child));
            }
            if !prefix.is_empty() {
                paths.push(prefix);
            }
        }
        paths
    }

    pub(crate) fn node_mut(&mut self, relative: &[String]) -> Option<&mut Relationship> {
        match relative.split_first() {
            None => Some(self),
            Some((first, rest)) => self.relationships.get_mut(first)?.node_mut(rest),
        }
    }
}

/// Ordered set of sibling relationships
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relationships(Vec<Relationship>);

impl Relationships {
    pub(crate) const fn empty() -> Self {
        Relationships(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&Relationship> {
        self.0.iter().find(|r| r.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Relationship> {
        self.0.iter_mut().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Relationship> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Follow a path of relationship names from this level
    pub fn resolve(&self, path: &[String]) -> Option<&Relationship> {
        let (first, rest) = path.split_first()?;
        let node = self.get(first)?;
        if rest.is_empty() {
            Some(node)
        } else {
            node.relationships.resolve(rest)
        }
    }

    fn resolve_mut(&mut self, path: &[String]) -> Option<&mut Relationship> {
        let (first, rest) = path.split_first()?;
        let node = self.get_mut(first)?;
        if rest.is_empty() {
            Some(node)
        } else {
            node.relationships.resolve_mut(rest)
        }
    }

    /// Every node below this level, parents before children
    pub fn descendants(&self) -> Vec<&Relationship> {
        let mut nodes = Vec::new();
        let mut stack: Vec<&Relationship> = self.0.iter().rev().collect();
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.relationships.iter().rev());
        }
        nodes
    }

    /// Build a declaration into a node under `parent` and record it.
    ///
    /// Returns the new subtree so the caller can resolve its schemas.
    pub(crate) fn declare(
        &mut self,
        root: &str,
        parent: &[String],
        declaration: Declaration,
    ) -> Result<Relationship> {
        let (owner, parent_alias) = match self.resolve(parent) {
            Some(node) => (node.table.clone(), node.alias.clone()),
            None if parent.is_empty() => (root.to_string(), root.to_string()),
            None => return Err(Error::relationship_not_found(root, parent.join("."))),
        };
        let relationship = declaration.build(parent, &parent_alias, &owner)?;
        self.attach(root, parent, relationship.clone())?;
        Ok(relationship)
    }

    /// Insert a built node under `parent`
    pub(crate) fn attach(
        &mut self,
        root: &str,
        parent: &[String],
        relationship: Relationship,
    ) -> Result<()> {
        let (owner, siblings) = if parent.is_empty() {
            (root.to_string(), self)
        } else {
            let node = self
                .resolve_mut(parent)
                .ok_or_else(|| Error::relationship_not_found(root, parent.join(".")))?;
            (node.table.clone(), &mut node.relationships)
        };
        siblings.push(&owner, relationship)
    }

    fn push(&mut self, owner: &str, relationship: Relationship) -> Result<()> {
        if self.contains(&relationship.name) {
            return Err(Error::duplicate_relationship(owner, &relationship.name));
        }
        self.0.push(relationship);
        Ok(())
    }

    /// The part of the tree reachable through the given paths
    pub fn subset(&self, paths: &[Vec<String>]) -> Relationships {
        let mut kept = Vec::new();
        for node in &self.0 {
            let below: Vec<Vec<String>> = paths
                .iter()
                .filter(|p| p.first() == Some(&node.name))
                .map(|p| p[1..].to_vec())
                .collect();
            if below.is_empty() {
                continue;
            }
            let nested: Vec<Vec<String>> = below.into_iter().filter(|p| !p.is_empty()).collect();
            let mut node = node.clone();
            node.relationships = node.relationships.subset(&nested);
            kept.push(node);
        }
        Relationships(kept)
    }
}

impl<'a> IntoIterator for &'a Relationships {
    type Item = &'a Relationship;
    type IntoIter = std::slice::Iter<'a, Relationship>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Declarative description of a relationship and its nested relationships
///
/// ```ignore
/// Declaration::has_many("Books")
///     .from_table("Book")
///     .with_keys("Id", "AuthorId")
///     .and_that(Declaration::has_one("Publisher").with_keys("PublisherId", "Id"))
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    name: String,
    kind: RelationshipKind,
    table: Option<String>,
    keys: Option<(String, String)>,
    nested: Vec<Declaration>,
}

impl Declaration {
    pub fn new(name: impl Into<String>, kind: RelationshipKind) -> Self {
        Self {
            name: name.into(),
            kind,
            table: None,
            keys: None,
            nested: Vec::new(),
        }
    }

    pub fn has_one(name: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::OneToOne)
    }

    pub fn has_many(name: impl Into<String>) -> Self {
        Self::new(name, RelationshipKind::OneToMany)
    }

    /// Real table name when it differs from the relationship name
    pub fn from_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// `primary_key` is a column of the parent table, `foreign_key` a column
    /// of the related table.
    pub fn with_keys(mut self, primary_key: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.keys = Some((primary_key.into(), foreign_key.into()));
        self
    }

    /// Declare a relationship of the related table
    pub fn and_that(mut self, nested: Declaration) -> Self {
        self.nested.push(nested);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(self, parent: &[String], parent_alias: &str, owner: &str) -> Result<Relationship> {
        alias::validate_name(&self.name, "relationship")?;
        let (primary_key, foreign_key) = self.keys.ok_or_else(|| {
            Error::invalid_query(format!(
                "relationship '{}' on '{}' needs keys; call with_keys()",
                self.name, owner
            ))
        })?;
        alias::validate_name(&primary_key, "column")?;
        alias::validate_name(&foreign_key, "column")?;

        let mut path = parent.to_vec();
        path.push(self.name.clone());
        let table_alias = alias::table_alias(&path);
        let table = self.table.unwrap_or_else(|| self.name.clone());

        let mut relationships = Relationships::default();
        for nested in self.nested {
            let child = nested.build(&path, &table_alias, &table)?;
            relationships.push(&table, child)?;
        }

        Ok(Relationship {
            primary_key: KeyRef {
                table_alias: parent_alias.to_string(),
                command_alias: alias::column_alias(parent, &primary_key),
                field: primary_key,
            },
            foreign_key: KeyRef {
                table_alias: table_alias.clone(),
                command_alias: alias::column_alias(&path, &foreign_key),
                field: foreign_key,
            },
            name: self.name,
            kind: self.kind,
            table,
            alias: table_alias,
            path,
            schema: None,
            relationships,
        })
    }
}
