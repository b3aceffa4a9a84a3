//! Declarative query descriptors.
//!
//! A [`Specification`] is pure data: a filter predicate drawn from a small closed algebra ([`Expr`]), at most one
//! ascending and one descending ordering key, an optional skip/take pair, a distinct flag, eager-load relation paths
//! and an optional column projection. It is built once, handed to a [`crate::Repository`], and never mutated
//! afterwards — the builder methods consume `self`, so immutability falls out of ownership.
//!
//! The [`SpecificationEvaluator`] renders a specification into an executable SQL query; the concrete specifications
//! used by the catalog and the reconciler live in [`product`] and [`orders`].
mod evaluator;
pub mod orders;
pub mod product;

use std::marker::PhantomData;

pub use evaluator::SpecificationEvaluator;

use crate::db_types::Entity;

//--------------------------------------       Value         ---------------------------------------------------------
/// A literal operand in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

//--------------------------------------        Expr         ---------------------------------------------------------
/// The closed filter algebra. Column names are compile-time constants; operands are bound as query parameters, never
/// interpolated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Eq(&'static str, Value),
    Like(&'static str, String),
    In(&'static str, Vec<Value>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn eq<V: Into<Value>>(column: &'static str, value: V) -> Self {
        Self::Eq(column, value.into())
    }

    pub fn like(column: &'static str, pattern: impl Into<String>) -> Self {
        Self::Like(column, pattern.into())
    }

    pub fn is_in<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column, values.into_iter().map(Into::into).collect())
    }

    /// Conjunction of the given parts, flattened: zero parts match everything, one part is returned as-is.
    pub fn and(parts: impl IntoIterator<Item = Expr>) -> Option<Self> {
        let mut parts = parts.into_iter().collect::<Vec<_>>();
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::And(parts)),
        }
    }
}

//--------------------------------------    Specification    ---------------------------------------------------------
/// An immutable, declarative query descriptor over entity type `T`.
#[derive(Debug, Clone)]
pub struct Specification<T> {
    criteria: Option<Expr>,
    order_by: Option<&'static str>,
    order_by_descending: Option<&'static str>,
    skip: i64,
    take: i64,
    paging_enabled: bool,
    distinct: bool,
    includes: Vec<String>,
    select: Option<Vec<&'static str>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Specification<T> {
    /// A specification with the given criteria; `None` matches all rows.
    pub fn new(criteria: Option<Expr>) -> Self {
        Self {
            criteria,
            order_by: None,
            order_by_descending: None,
            skip: 0,
            take: 0,
            paging_enabled: false,
            distinct: false,
            includes: Vec::new(),
            select: None,
            _entity: PhantomData,
        }
    }

    /// Order ascending by the given column (or SQL expression over columns, e.g. a numeric cast).
    pub fn with_order_by(mut self, key: &'static str) -> Self {
        self.order_by = Some(key);
        self
    }

    pub fn with_order_by_descending(mut self, key: &'static str) -> Self {
        self.order_by_descending = Some(key);
        self
    }

    /// Skip `skip` rows and return at most `take`. Negative values are a caller error and surface when the query
    /// executes against the store.
    pub fn with_paging(mut self, skip: i64, take: i64) -> Self {
        self.skip = skip;
        self.take = take;
        self.paging_enabled = true;
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Eagerly load the relation named by `path` (multi-level paths use `.` separators and are resolved by the
    /// entity). Paths are applied in declaration order.
    pub fn with_include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    /// Project the result onto the given columns. The projection is applied last, after filtering, ordering, paging
    /// and deduplication, so distinctness is always computed on the base row shape.
    pub fn with_select(mut self, columns: Vec<&'static str>) -> Self {
        self.select = Some(columns);
        self
    }

    pub fn criteria(&self) -> Option<&Expr> {
        self.criteria.as_ref()
    }

    pub fn order_by(&self) -> Option<&'static str> {
        self.order_by
    }

    pub fn order_by_descending(&self) -> Option<&'static str> {
        self.order_by_descending
    }

    pub fn skip(&self) -> i64 {
        self.skip
    }

    pub fn take(&self) -> i64 {
        self.take
    }

    pub fn is_paging_enabled(&self) -> bool {
        self.paging_enabled
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn select(&self) -> Option<&[&'static str]> {
        self.select.as_deref()
    }
}
