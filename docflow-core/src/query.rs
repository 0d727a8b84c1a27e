//! Filter expressions and find options.
//!
//! Filters are a small structured AST passed through to the store driver; nothing here parses a
//! query language. Drivers translate or evaluate the AST with a [`QueryVisitor`].
//!
//! [`Filter`] builds terms (`eq`, `ne`, `gt`, `gte`, `lt`, `lte`, `starts_with`, `ends_with`,
//! `contains`, `not_contains`, `exists`, `not_exists`, `any_of`, `none_of`) and combines them
//! with `and`/`or`; [`Expr::not`] negates. Field names may be dotted paths (`"address.city"`).
//!
//! ```ignore
//! use docflow::query::{Filter, SortDirection};
//!
//! let teens = Filter::gte("age", 13).and(Filter::lt("age", 20));
//! let found = users
//!     .find(teens)
//!     .sort("age", SortDirection::Desc)
//!     .limit(10)
//!     .all::<UserInfo>()
//!     .await?;
//! ```

use bson::{Bson, Document};

use crate::error::DocumentStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Comparison applied by an [`Expr::Field`] term.
///
/// Ordering operators compare numbers across integer and floating point kinds. `Eq` on an array
/// field with a scalar operand matches when any element equals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring for strings, membership for arrays.
    Contains,
    NotContains,
    /// Case-sensitive string prefix.
    StartsWith,
    /// Case-sensitive string suffix.
    EndsWith,
    /// Set membership: the operand is an array of candidates.
    AnyOf,
    NoneOf,
}

/// Structured filter handed to store drivers.
///
/// `And(vec![])` selects every document and `Or(vec![])` selects none.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// `(field, present)`: tests presence, not value; a `null` field is present.
    Exists(String, bool),
    Field {
        /// Dotted path into the document.
        field: String,
        op: FieldOp,
        value: Bson,
    },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Conjunction. Chained calls extend one `And` list instead of nesting.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut terms) if !terms.is_empty() => {
                terms.push(other);
                Expr::And(terms)
            }
            Expr::And(_) => Expr::And(vec![other]),
            single => Expr::And(vec![single, other]),
        }
    }

    /// Disjunction. Chained calls extend one `Or` list instead of nesting.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut terms) => {
                terms.push(other);
                Expr::Or(terms)
            }
            single => Expr::Or(vec![single, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// `true` for the empty conjunction produced by [`Filter::all`].
    pub fn matches_all(&self) -> bool {
        matches!(self, Expr::And(terms) if terms.is_empty())
    }
}

impl Default for Expr {
    fn default() -> Self {
        Filter::all()
    }
}

/// Constructors for [`Expr`].
pub struct Filter;

fn term(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Expr {
    Expr::field(field.into(), op, value.into())
}

impl Filter {
    pub fn all() -> Expr {
        Expr::And(Vec::new())
    }

    /// Selects by `_id`.
    pub fn id(id: impl Into<Bson>) -> Expr {
        term("_id", FieldOp::Eq, id)
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Lte, value)
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<Bson>) -> Expr {
        term(field, FieldOp::StartsWith, prefix)
    }

    pub fn ends_with(field: impl Into<String>, suffix: impl Into<Bson>) -> Expr {
        term(field, FieldOp::EndsWith, suffix)
    }

    /// Substring of a string field, or member of an array field. An array operand requires
    /// every one of its elements to be present.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::Contains, value)
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        term(field, FieldOp::NotContains, value)
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(terms: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(terms.into_iter().collect())
    }

    pub fn or(terms: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(terms.into_iter().collect())
    }

    /// The field equals one of `candidates`; an array field matches when it shares an element
    /// with them. A scalar operand is a single candidate.
    pub fn any_of(field: impl Into<String>, candidates: impl Into<Bson>) -> Expr {
        term(field, FieldOp::AnyOf, candidates)
    }

    /// Negation of [`Filter::any_of`]; also matches a missing field.
    pub fn none_of(field: impl Into<String>, candidates: impl Into<Bson>) -> Expr {
        term(field, FieldOp::NoneOf, candidates)
    }
}

/// Field selection for returned documents.
///
/// An inclusion projection keeps only the named fields (plus `_id`, unless excluded); an
/// exclusion projection drops the named fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include(fields.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// The projection as a `{ field: 0|1 }` document.
    pub fn to_document(&self) -> Document {
        let (fields, flag) = match self {
            Projection::Include(fields) => (fields, 1),
            Projection::Exclude(fields) => (fields, 0),
        };

        fields
            .iter()
            .map(|field| (field.clone(), Bson::Int32(flag)))
            .collect()
    }
}

/// A complete read request handed to the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    /// Documents to select.
    pub filter: Expr,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
}

impl FindSpec {
    pub fn new(filter: Expr) -> Self {
        Self { filter, ..Self::default() }
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// A limit of `0` means no limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The limit to apply, with `0` read as unlimited.
    pub fn effective_limit(&self) -> Option<u64> {
        self.limit.filter(|limit| *limit > 0)
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Walks an [`Expr`] tree bottom-up. The MongoDB driver translates with it, the in-memory
/// driver evaluates with it.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, terms: &[Expr]) -> Result<Self::Output, Self::Error>;

    fn visit_or(&mut self, terms: &[Expr]) -> Result<Self::Output, Self::Error>;

    fn visit_not(&mut self, inner: &Expr) -> Result<Self::Output, Self::Error>;

    fn visit_exists(&mut self, field: &str, present: bool) -> Result<Self::Output, Self::Error>;

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(terms) => self.visit_and(terms),
            Expr::Or(terms) => self.visit_or(terms),
            Expr::Not(inner) => self.visit_not(inner),
            Expr::Exists(field, present) => self.visit_exists(field, *present),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
