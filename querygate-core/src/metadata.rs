//! The metadata-discovery collaborator's data shapes (§1 "out of scope (external collaborators)").
//!
//! The real discovery mechanism — reading `INFORMATION_SCHEMA`, `sys.columns`, or equivalent — is
//! explicitly out of scope. What this module pins down is the shape that collaborator is assumed to
//! hand back, plus an in-memory `StaticMetadataProvider` so the rest of the crate (and its tests) can be
//! driven without a real one.

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    Decimal,
    Text,
    Bool,
    Bytes,
    DateTime,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// The backing (database) column name. SQL text never uses the exposed name (§3 invariant).
    pub backing_name: SmolStr,
    /// The name presented in API responses.
    pub exposed_name: SmolStr,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub read_only: bool,
    pub auto_generated: bool,
    pub has_default: bool,
    pub default_literal: Option<SmolStr>,
}

impl ColumnDef {
    pub fn new(name: impl Into<SmolStr>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            backing_name: name.clone(),
            exposed_name: name,
            column_type,
            nullable: true,
            read_only: false,
            auto_generated: false,
            has_default: false,
            default_literal: None,
        }
    }

    pub fn exposed(mut self, exposed_name: impl Into<SmolStr>) -> Self {
        self.exposed_name = exposed_name.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDef {
    pub referencing_columns: Vec<SmolStr>,
    pub referenced_schema: Option<SmolStr>,
    pub referenced_table: SmolStr,
    pub referenced_columns: Vec<SmolStr>,
}

/// Table/view shape, created once at startup and held immutable thereafter (§3).
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub schema: Option<SmolStr>,
    pub name: SmolStr,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<SmolStr>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl SourceDefinition {
    pub fn new(name: impl Into<SmolStr>, columns: Vec<ColumnDef>, primary_key: Vec<SmolStr>) -> Self {
        Self { schema: None, name: name.into(), columns, primary_key, foreign_keys: Vec::new() }
    }

    pub fn with_schema(mut self, schema: impl Into<SmolStr>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Resolves an exposed field name to its backing column definition. Used by the OData-to-Predicate
    /// visitor and the cursor decoder so that exposed names never reach SQL text.
    pub fn column_by_exposed(&self, exposed_name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.exposed_name == exposed_name)
    }

    pub fn column_by_backing(&self, backing_name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.backing_name == backing_name)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.primary_key
            .iter()
            .filter_map(move |pk| self.column_by_backing(pk))
    }
}

/// The metadata-discovery collaborator's interface: `entity → SourceDefinition`, plus the list of all
/// entities (§6 "Inputs consumed from upstream collaborators").
pub trait MetadataProvider: Send + Sync {
    fn get(&self, entity: &str) -> GatewayResult<&SourceDefinition>;
    fn entities(&self) -> Vec<&str>;
}

/// An in-memory provider backing tests and small deployments that configure entities directly rather
/// than through live schema discovery.
#[derive(Debug, Default)]
pub struct StaticMetadataProvider {
    entities: HashMap<String, SourceDefinition>,
}

impl StaticMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, entity: impl Into<String>, def: SourceDefinition) -> Self {
        self.entities.insert(entity.into(), def);
        self
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn get(&self, entity: &str) -> GatewayResult<&SourceDefinition> {
        self.entities.get(entity).ok_or_else(|| GatewayError::entity_not_found(entity))
    }

    fn entities(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_def() -> SourceDefinition {
        SourceDefinition::new(
            "books",
            vec![
                ColumnDef::new("id", ColumnType::Int).not_null().auto_generated(),
                ColumnDef::new("title", ColumnType::Text).exposed("title"),
            ],
            vec!["id".into()],
        )
        .with_schema("dbo")
    }

    #[test]
    fn lookup_by_exposed_and_backing_name() {
        let def = book_def();
        assert_eq!(def.column_by_exposed("title").unwrap().backing_name, "title");
        assert_eq!(def.column_by_backing("id").unwrap().exposed_name, "id");
    }

    #[test]
    fn static_provider_reports_entity_not_found() {
        let provider = StaticMetadataProvider::new().register("Book", book_def());
        assert!(provider.get("Book").is_ok());
        let err = provider.get("Missing").unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::EntityNotFound);
    }
}
