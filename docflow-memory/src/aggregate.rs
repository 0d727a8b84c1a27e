//! Runs aggregation pipelines over in-memory documents.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docflow_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, AccumulatorOp, Pipeline, Stage},
    query::Projection,
};

use crate::evaluator::{Comparable, DocumentEvaluator, compare_documents, compare_optional, lookup};

pub(crate) fn run(mut documents: Vec<Document>, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline.stages() {
        documents = match stage {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if DocumentEvaluator::matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            Stage::Group { key, accumulators } => group(documents, key.as_deref(), accumulators),
            Stage::Sort(keys) => {
                documents.sort_by(|a, b| compare_documents(a, b, keys));
                documents
            }
            Stage::Skip(skip) => documents.into_iter().skip(*skip as usize).collect(),
            Stage::Limit(limit) => documents.into_iter().take(*limit as usize).collect(),
            Stage::Project(projection) => documents
                .into_iter()
                .map(|document| project(document, projection))
                .collect(),
            Stage::Raw(stage) => {
                return Err(DocumentStoreError::Unsupported(format!(
                    "raw pipeline stage {:?} in the memory backend",
                    stage.keys().next()
                )));
            }
        };
    }

    Ok(documents)
}

/// Keeps or drops fields as the projection says. `_id` is kept unless excluded.
pub(crate) fn project(document: Document, projection: &Projection) -> Document {
    match projection {
        Projection::Include(fields) => document
            .into_iter()
            .filter(|(key, _)| key == "_id" || fields.iter().any(|field| field == key))
            .collect(),
        Projection::Exclude(fields) => document
            .into_iter()
            .filter(|(key, _)| !fields.iter().any(|field| field == key))
            .collect(),
    }
}

fn group(documents: Vec<Document>, key: Option<&str>, accumulators: &[Accumulator]) -> Vec<Document> {
    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();

    for document in documents {
        let id = key
            .and_then(|key| lookup(&document, key))
            .cloned()
            .unwrap_or(Bson::Null);

        match groups
            .iter_mut()
            .find(|(existing, _)| Comparable::from(existing) == Comparable::from(&id))
        {
            Some((_, members)) => members.push(document),
            None => groups.push((id, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(id, members)| {
            let mut output = Document::new();
            output.insert("_id", id);
            for accumulator in accumulators {
                output.insert(accumulator.output.clone(), accumulate(accumulator, &members));
            }
            output
        })
        .collect()
}

fn accumulate(accumulator: &Accumulator, members: &[Document]) -> Bson {
    let values: Vec<&Bson> = match &accumulator.field {
        Some(field) => members.iter().filter_map(|member| lookup(member, field)).collect(),
        None => Vec::new(),
    };
    let numbers = || values.iter().filter_map(|value| number(value));

    match accumulator.op {
        AccumulatorOp::Count => Bson::Int32(members.len() as i32),
        AccumulatorOp::Sum => sum(&values),
        AccumulatorOp::Avg => {
            let count = numbers().count();
            if count == 0 {
                Bson::Null
            } else {
                Bson::Double(numbers().sum::<f64>() / count as f64)
            }
        }
        AccumulatorOp::Min => extreme(&values, Ordering::Less),
        AccumulatorOp::Max => extreme(&values, Ordering::Greater),
    }
}

/// Integers add exactly; a double among the values, or an overflowing total, makes the sum a
/// double. Non-numeric values are ignored.
fn sum(values: &[&Bson]) -> Bson {
    let exact = values
        .iter()
        .filter(|value| number(value).is_some())
        .try_fold(0i64, |total, value| match value {
            Bson::Int32(v) => total.checked_add(i64::from(*v)),
            Bson::Int64(v) => total.checked_add(*v),
            _ => None,
        });

    match exact {
        Some(total) => narrow(total),
        None => Bson::Double(values.iter().filter_map(|value| number(value)).sum()),
    }
}

fn extreme(values: &[&Bson], wanted: Ordering) -> Bson {
    values
        .iter()
        .filter(|value| !matches!(value, Bson::Null))
        .copied()
        .reduce(|best, value| {
            if compare_optional(Some(value), Some(best)) == wanted {
                value
            } else {
                best
            }
        })
        .cloned()
        .unwrap_or(Bson::Null)
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn narrow(value: i64) -> Bson {
    i32::try_from(value).map_or(Bson::Int64(value), Bson::Int32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docflow_core::query::{Filter, SortDirection};

    fn ages() -> Vec<Document> {
        [6, 6, 6, 6, 7, 8]
            .into_iter()
            .enumerate()
            .map(|(i, age)| doc! { "_id": i as i32, "age": age, "score": age as f64 / 2.0 })
            .collect()
    }

    #[test]
    fn groups_and_counts_by_key() {
        let pipeline = Pipeline::new()
            .group(Some("age"), [Accumulator::count("n"), Accumulator::sum("age", "total")])
            .sort("_id", SortDirection::Asc);

        let output = run(ages(), &pipeline).unwrap();
        assert_eq!(
            output,
            vec![
                doc! { "_id": 6, "n": 4, "total": 24 },
                doc! { "_id": 7, "n": 1, "total": 7 },
                doc! { "_id": 8, "n": 1, "total": 8 },
            ]
        );
    }

    #[test]
    fn averages_and_extremes_over_everything() {
        let pipeline = Pipeline::new()
            .match_(Filter::gte("age", 7))
            .group(None, [Accumulator::avg("score", "avg"), Accumulator::min("age", "lo"), Accumulator::max("age", "hi")]);

        let output = run(ages(), &pipeline).unwrap();
        assert_eq!(output, vec![doc! { "_id": Bson::Null, "avg": 3.75, "lo": 7, "hi": 8 }]);
    }

    #[test]
    fn sums_stay_exact_until_they_overflow() {
        let big = (1i64 << 53) + 1;
        let pipeline = Pipeline::new().group(None, [Accumulator::sum("n", "total")]);

        let exact = vec![doc! { "n": big }, doc! { "n": 1 }, doc! { "n": "seven" }];
        assert_eq!(run(exact, &pipeline).unwrap(), vec![doc! { "_id": Bson::Null, "total": big + 1 }]);

        let mixed = vec![doc! { "n": 1 }, doc! { "n": 0.5 }];
        assert_eq!(run(mixed, &pipeline).unwrap(), vec![doc! { "_id": Bson::Null, "total": 1.5 }]);

        let overflowing = vec![doc! { "n": i64::MAX }, doc! { "n": i64::MAX }];
        assert!(matches!(
            run(overflowing, &pipeline).unwrap()[0].get("total"),
            Some(Bson::Double(total)) if *total > 1.8e19
        ));
    }

    #[test]
    fn skips_limits_and_projects() {
        let pipeline = Pipeline::new()
            .sort("age", SortDirection::Desc)
            .skip(1)
            .limit(2)
            .project(Projection::include(["age"]));

        let output = run(ages(), &pipeline).unwrap();
        assert_eq!(output, vec![doc! { "_id": 4, "age": 7 }, doc! { "_id": 0, "age": 6 }]);
    }

    #[test]
    fn raw_stages_are_unsupported() {
        let pipeline = Pipeline::new().raw(doc! { "$lookup": {} });
        assert!(matches!(run(ages(), &pipeline), Err(DocumentStoreError::Unsupported(_))));
    }
}
