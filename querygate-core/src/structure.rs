//! Per-operation query structures (§4.1): the single source of truth the SQL builders consume.
//!
//! Grounded on the donor's `prax-query/src/query.rs` split between a generic entry point and
//! operation-specific builders, reworked per §9's "capability interfaces" note: instead of a class
//! hierarchy (`BaseSqlQueryStructure` shared by subclasses), every operation struct embeds the same
//! immutable-ish [`QueryStructureHeader`] and the SQL builders dispatch on an explicit operation tag.

use std::collections::HashMap;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::ident::Counter;
use crate::metadata::{ColumnType, MetadataProvider, SourceDefinition};
use crate::model::{
    and_join, Column, FilterValue, JoinStructure, KeysetPagePredicate, LabelledColumn, OrderByColumn,
    Predicate, PredicateOperand,
};

/// A bound SQL parameter (§3 `Parameter`).
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: SmolStr,
    pub value: FilterValue,
    pub type_tag: Option<ColumnType>,
}

/// Anything that can mint a new bound parameter. Implemented by [`QueryStructureHeader`]; the
/// OData-to-Predicate visitor and the policy processor are generic over this trait so they can append
/// parameters to whichever structure they're scoped to.
pub trait ParameterSink {
    /// Registers a new parameter, returning its counter-suffixed name. Never deduplicates, even for
    /// identical values (§4.1 contract). When `backing_column` resolves against the structure's
    /// `SourceDefinition`, the parameter's type tag is copied from that column so dialect binding picks
    /// the right wire type.
    fn add_parameter(&mut self, value: FilterValue, backing_column: Option<&str>) -> SmolStr;
}

/// One of Read, Create, Update, Delete, Execute — compound operations (Upsert, UpsertIncremental) lower
/// to sets of these (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementalOperation {
    Read,
    Create,
    Update,
    Delete,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOperation {
    Upsert,
    UpsertIncremental,
}

impl CompoundOperation {
    /// `Upsert → {Update, Create}` (§4.3 step 4); `UpsertIncremental` lowers the same way — it differs
    /// from `Upsert` only in how the executor classifies the result (§4.7), not in which policies apply.
    pub fn elementals(self) -> [ElementalOperation; 2] {
        [ElementalOperation::Update, ElementalOperation::Create]
    }
}

/// The decoded `$first` / `$after` pagination request for a `Find`.
#[derive(Debug, Clone, Default)]
pub struct PaginationSpec {
    pub first: Option<u32>,
    pub after: Vec<KeysetPagePredicate>,
}

/// The shared header every per-operation structure embeds: entity resolution, the alias/parameter
/// counter, the parameter map, and policy predicates keyed by elemental operation.
#[derive(Debug)]
pub struct QueryStructureHeader {
    pub entity_name: SmolStr,
    pub source: SourceDefinition,
    pub source_alias: SmolStr,
    counter: Counter,
    parameters: IndexMap<SmolStr, Parameter>,
    policy_predicates: HashMap<ElementalOperation, Vec<Predicate>>,
}

impl QueryStructureHeader {
    /// Resolves `entity_name` against the metadata provider, failing with `EntityNotFound` per §4.1's
    /// construction contract.
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        let entity_name = entity_name.into();
        let source = metadata.get(&entity_name)?.clone();
        let mut counter = Counter::new();
        let source_alias = counter.next_alias();
        Ok(Self {
            entity_name,
            source,
            source_alias,
            counter,
            parameters: IndexMap::new(),
            policy_predicates: HashMap::new(),
        })
    }

    pub fn create_table_alias(&mut self) -> SmolStr {
        self.counter.next_alias()
    }

    pub fn next_session_param(&mut self) -> SmolStr {
        self.counter.next_session_param()
    }

    /// Registers a `@session_paramN` parameter for the T-SQL session-context prelude (§4.4), tracked in
    /// the same parameter map as ordinary parameters so *parameter closure* (§8) still holds.
    pub fn add_session_parameter(&mut self, value: FilterValue) -> SmolStr {
        let name = self.counter.next_session_param();
        self.parameters.insert(name.clone(), Parameter { name: name.clone(), value, type_tag: None });
        name
    }

    pub fn base_column(&self, backing_name: &str) -> Column {
        let mut col = Column::new(self.source.name.clone(), backing_name.to_string());
        col.table_alias = Some(self.source_alias.clone());
        col
    }

    /// Appends a predicate tree for one elemental operation, produced by the Authorization Policy
    /// Processor (§4.2 invariant: "Policy predicates for a compound operation ... computed per elemental
    /// operation").
    pub fn add_policy_predicate(&mut self, op: ElementalOperation, predicate: Predicate) {
        self.policy_predicates.entry(op).or_default().push(predicate);
    }

    /// Returns the cached, already-AND-joined policy predicate for this elemental operation, or `None`
    /// when no policy predicate was ever registered for it (§4.1 `get_db_policy`).
    pub fn get_db_policy(&self, op: ElementalOperation) -> Option<Predicate> {
        self.policy_predicates.get(&op).map(|ps| and_join(ps.clone()))
    }

    pub fn parameters(&self) -> &IndexMap<SmolStr, Parameter> {
        &self.parameters
    }

    /// *Parameter closure* (§8): every name in `parameters()` appears in the emitted SQL and vice versa.
    /// This method only guarantees the map side; builders are responsible for referencing exactly the
    /// names they requested via [`ParameterSink::add_parameter`].
    pub fn into_parameters(self) -> IndexMap<SmolStr, Parameter> {
        self.parameters
    }
}

impl ParameterSink for QueryStructureHeader {
    fn add_parameter(&mut self, value: FilterValue, backing_column: Option<&str>) -> SmolStr {
        let name = self.counter.next_param();
        let type_tag = backing_column.and_then(|c| self.source.column_by_backing(c)).map(|c| c.column_type);
        self.parameters.insert(name.clone(), Parameter { name: name.clone(), value, type_tag });
        name
    }
}

/// A SELECT-shaped structure: the richest of the six, since it alone carries joins, ordering, and
/// pagination.
#[derive(Debug)]
pub struct FindStructure {
    pub header: QueryStructureHeader,
    pub columns: Vec<LabelledColumn>,
    pub predicates: Vec<Predicate>,
    pub joins: Vec<JoinStructure>,
    pub order_by: Vec<OrderByColumn>,
    pub pagination: Option<PaginationSpec>,
}

impl FindStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self {
            header: QueryStructureHeader::new(entity_name, metadata)?,
            columns: Vec::new(),
            predicates: Vec::new(),
            joins: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
        })
    }

    pub fn add_column(&mut self, column: LabelledColumn) {
        self.columns.push(column);
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn add_join(&mut self, join: JoinStructure) {
        self.joins.push(join);
    }

    pub fn set_order_by(&mut self, order_by: Vec<OrderByColumn>) {
        self.order_by = order_by;
    }

    pub fn set_pagination(&mut self, pagination: PaginationSpec) {
        self.pagination = Some(pagination);
    }
}

impl ParameterSink for FindStructure {
    fn add_parameter(&mut self, value: FilterValue, backing_column: Option<&str>) -> SmolStr {
        self.header.add_parameter(value, backing_column)
    }
}

#[derive(Debug)]
pub struct InsertStructure {
    pub header: QueryStructureHeader,
    /// `(backing_column, bound_value_operand)` pairs, in insertion order.
    pub values: Vec<(SmolStr, PredicateOperand)>,
}

impl InsertStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self { header: QueryStructureHeader::new(entity_name, metadata)?, values: Vec::new() })
    }

    pub fn set_value(&mut self, backing_column: impl Into<SmolStr>, value: FilterValue) {
        let backing_column = backing_column.into();
        let param = self.header.add_parameter(value, Some(backing_column.as_str()));
        self.values.push((backing_column, PredicateOperand::param(param)));
    }
}

#[derive(Debug)]
pub struct UpdateStructure {
    pub header: QueryStructureHeader,
    pub values: Vec<(SmolStr, PredicateOperand)>,
    pub predicates: Vec<Predicate>,
}

impl UpdateStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self {
            header: QueryStructureHeader::new(entity_name, metadata)?,
            values: Vec::new(),
            predicates: Vec::new(),
        })
    }

    pub fn set_value(&mut self, backing_column: impl Into<SmolStr>, value: FilterValue) {
        let backing_column = backing_column.into();
        let param = self.header.add_parameter(value, Some(backing_column.as_str()));
        self.values.push((backing_column, PredicateOperand::param(param)));
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

#[derive(Debug)]
pub struct DeleteStructure {
    pub header: QueryStructureHeader,
    pub predicates: Vec<Predicate>,
}

impl DeleteStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self { header: QueryStructureHeader::new(entity_name, metadata)?, predicates: Vec::new() })
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

/// Insert-or-update. Reports `IS_UPDATE` back to the caller per the §4.7 state machine; the concrete
/// classification lives in the T-SQL executor since only T-SQL needs the two-statement batch to tell
/// the two cases apart (PG-SQL/MY-SQL classify from the single statement's own result, see §4.2).
#[derive(Debug)]
pub struct UpsertStructure {
    pub header: QueryStructureHeader,
    pub insert_values: Vec<(SmolStr, PredicateOperand)>,
    pub update_values: Vec<(SmolStr, PredicateOperand)>,
    pub predicates: Vec<Predicate>,
}

impl UpsertStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self {
            header: QueryStructureHeader::new(entity_name, metadata)?,
            insert_values: Vec::new(),
            update_values: Vec::new(),
            predicates: Vec::new(),
        })
    }

    pub fn set_value(&mut self, backing_column: impl Into<SmolStr>, value: FilterValue) {
        let backing_column = backing_column.into();
        let insert_param = self.header.add_parameter(value.clone(), Some(backing_column.as_str()));
        let update_param = self.header.add_parameter(value, Some(backing_column.as_str()));
        self.insert_values.push((backing_column.clone(), PredicateOperand::param(insert_param)));
        self.update_values.push((backing_column, PredicateOperand::param(update_param)));
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

/// Used for `EXISTS`-only checks (e.g. validating a foreign key reference before insert).
#[derive(Debug)]
pub struct ExistsStructure {
    pub header: QueryStructureHeader,
    pub predicates: Vec<Predicate>,
}

impl ExistsStructure {
    pub fn new(entity_name: impl Into<SmolStr>, metadata: &dyn MetadataProvider) -> GatewayResult<Self> {
        Ok(Self { header: QueryStructureHeader::new(entity_name, metadata)?, predicates: Vec::new() })
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

/// Fails fast with `EntityNotFound` when no metadata is registered — exercised directly since every
/// structure constructor shares this path.
pub fn require_entity<'a>(
    entity_name: &str,
    metadata: &'a dyn MetadataProvider,
) -> GatewayResult<&'a SourceDefinition> {
    metadata.get(entity_name).map_err(|_| GatewayError::entity_not_found(entity_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnDef, ColumnType, StaticMetadataProvider};

    fn metadata() -> StaticMetadataProvider {
        StaticMetadataProvider::new().register(
            "Book",
            SourceDefinition::new(
                "books",
                vec![
                    ColumnDef::new("id", ColumnType::Int).not_null().auto_generated(),
                    ColumnDef::new("title", ColumnType::Text),
                ],
                vec!["id".into()],
            )
            .with_schema("dbo"),
        )
    }

    #[test]
    fn unknown_entity_fails_construction() {
        let md = metadata();
        let err = FindStructure::new("Missing", &md).unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::EntityNotFound);
    }

    #[test]
    fn add_parameter_never_deduplicates() {
        let md = metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let a = find.add_parameter(FilterValue::Int(1), Some("id"));
        let b = find.add_parameter(FilterValue::Int(1), Some("id"));
        assert_ne!(a, b);
        assert_eq!(find.header.parameters().len(), 2);
    }

    #[test]
    fn parameter_type_tag_copied_from_source_definition() {
        let md = metadata();
        let mut find = FindStructure::new("Book", &md).unwrap();
        let name = find.add_parameter(FilterValue::Int(1), Some("id"));
        assert_eq!(find.header.parameters()[&name].type_tag, Some(ColumnType::Int));
    }

    #[test]
    fn upsert_compound_operation_lowers_to_update_and_create() {
        assert_eq!(
            CompoundOperation::Upsert.elementals(),
            [ElementalOperation::Update, ElementalOperation::Create]
        );
    }

    #[test]
    fn get_db_policy_is_none_when_never_registered() {
        let md = metadata();
        let find = FindStructure::new("Book", &md).unwrap();
        assert!(find.header.get_db_policy(ElementalOperation::Read).is_none());
    }
}
