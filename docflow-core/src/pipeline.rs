//! Aggregation pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. The in-memory driver evaluates the structured
//! stages itself; the MongoDB driver renders them with [`Pipeline::to_documents`]. [`Stage::Raw`]
//! passes a driver-native stage through untouched and is only understood by drivers that speak
//! the store's own pipeline language.
//!
//! ```ignore
//! let pipeline = Pipeline::new()
//!     .match_(Filter::gte("age", 6))
//!     .group(Some("age"), [Accumulator::count("n"), Accumulator::avg("weight", "avgWeight")])
//!     .sort("_id", SortDirection::Asc);
//!
//! let rows = users.aggregate(pipeline).documents().await?;
//! ```

use bson::{Bson, Document, doc};

use crate::query::{Expr, Projection, Sort, SortDirection};

/// Accumulator operator of a `$group` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    /// Number of documents in the group.
    Count,
}

impl AccumulatorOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "$sum",
            AccumulatorOp::Avg => "$avg",
            AccumulatorOp::Min => "$min",
            AccumulatorOp::Max => "$max",
            AccumulatorOp::Count => "$count",
        }
    }
}

/// One output field of a `$group` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    /// Output field name.
    pub output: String,
    pub op: AccumulatorOp,
    /// Input field; unused by [`AccumulatorOp::Count`].
    pub field: Option<String>,
}

impl Accumulator {
    pub fn sum(field: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(AccumulatorOp::Sum, Some(field.into()), output)
    }

    pub fn avg(field: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(AccumulatorOp::Avg, Some(field.into()), output)
    }

    pub fn min(field: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(AccumulatorOp::Min, Some(field.into()), output)
    }

    pub fn max(field: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(AccumulatorOp::Max, Some(field.into()), output)
    }

    pub fn count(output: impl Into<String>) -> Self {
        Self::new(AccumulatorOp::Count, None, output)
    }

    fn new(op: AccumulatorOp, field: Option<String>, output: impl Into<String>) -> Self {
        Self { output: output.into(), op, field }
    }
}

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Expr),
    /// Groups documents by the value of `key` (all documents in one group when `None`). The
    /// group key is written to `_id`.
    Group {
        key: Option<String>,
        accumulators: Vec<Accumulator>,
    },
    Sort(Vec<Sort>),
    Skip(u64),
    Limit(u64),
    Project(Projection),
    /// A driver-native stage document.
    Raw(Document),
}

/// An ordered list of aggregation stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn match_(self, filter: Expr) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn group(
        self,
        key: Option<&str>,
        accumulators: impl IntoIterator<Item = Accumulator>,
    ) -> Self {
        self.stage(Stage::Group {
            key: key.map(str::to_string),
            accumulators: accumulators.into_iter().collect(),
        })
    }

    /// Adds a sort key. Consecutive calls extend the same `$sort` stage.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let key = Sort { field: field.into(), direction };
        match self.stages.last_mut() {
            Some(Stage::Sort(keys)) => keys.push(key),
            _ => self.stages.push(Stage::Sort(vec![key])),
        }
        self
    }

    pub fn skip(self, skip: u64) -> Self {
        self.stage(Stage::Skip(skip))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.stage(Stage::Limit(limit))
    }

    pub fn project(self, projection: Projection) -> Self {
        self.stage(Stage::Project(projection))
    }

    pub fn raw(self, stage: Document) -> Self {
        self.stage(Stage::Raw(stage))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Renders every stage except `$match` filters, which need a driver-specific translation
    /// supplied by `translate`.
    pub fn to_documents<E>(
        &self,
        mut translate: impl FnMut(&Expr) -> Result<Document, E>,
    ) -> Result<Vec<Document>, E> {
        self.stages
            .iter()
            .map(|stage| -> Result<Document, E> {
                Ok(match stage {
                    Stage::Match(filter) => doc! { "$match": translate(filter)? },
                    Stage::Group { key, accumulators } => {
                        let id = match key {
                            Some(key) => Bson::String(format!("${key}")),
                            None => Bson::Null,
                        };
                        let mut group = doc! { "_id": id };
                        for accumulator in accumulators {
                            let input = match (&accumulator.op, &accumulator.field) {
                                (AccumulatorOp::Count, _) => doc! { "$sum": 1 },
                                (op, Some(field)) => doc! { op.as_str(): format!("${field}") },
                                (op, None) => doc! { op.as_str(): Bson::Null },
                            };
                            group.insert(accumulator.output.clone(), input);
                        }
                        doc! { "$group": group }
                    }
                    Stage::Sort(keys) => doc! { "$sort": sort_document(keys) },
                    Stage::Skip(skip) => doc! { "$skip": *skip as i64 },
                    Stage::Limit(limit) => doc! { "$limit": *limit as i64 },
                    Stage::Project(projection) => doc! { "$project": projection.to_document() },
                    Stage::Raw(stage) => stage.clone(),
                })
            })
            .collect()
    }
}

/// Renders sort keys as `{ field: 1|-1 }`.
pub fn sort_document(keys: &[Sort]) -> Document {
    keys.iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            (key.field.clone(), Bson::Int32(direction))
        })
        .collect()
}
