//! Applies update operators to in-memory documents.

use bson::{Bson, Document};

use docflow_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp},
    update::{Update, UpdateOp},
};

/// Applies `update` to `document`. Returns `true` when the document changed.
///
/// A failing operator may leave earlier operators applied, so callers work on a copy.
///
/// # Errors
///
/// Returns [`DocumentStoreError::StoreOperation`] when an operator meets a field of the wrong
/// kind, or when the update would change `_id`.
pub(crate) fn apply(document: &mut Document, update: &Update) -> DocumentStoreResult<bool> {
    let before = document.clone();

    for op in update.ops() {
        if op.field() == "_id" || op.field().starts_with("_id.") {
            return Err(DocumentStoreError::StoreOperation(
                "the _id field is immutable".to_string(),
            ));
        }

        match op {
            UpdateOp::Set(field, value) => {
                *slot(document, field)? = Some(value.clone());
            }
            UpdateOp::Unset(field) => {
                *slot(document, field)? = None;
            }
            UpdateOp::Inc(field, by) => {
                let mut entry = slot(document, field)?;
                let sum = add(field, entry.as_ref().unwrap_or(&Bson::Int32(0)), by)?;
                *entry = Some(sum);
            }
            UpdateOp::Push(field, value) => {
                let mut entry = slot(document, field)?;
                let items = match entry.take() {
                    Some(Bson::Array(mut items)) => {
                        items.push(value.clone());
                        items
                    }
                    Some(other) => {
                        let kind = other.element_type();
                        *entry = Some(other);
                        return Err(DocumentStoreError::StoreOperation(format!(
                            "cannot push to non-array field {field} ({kind:?})"
                        )));
                    }
                    None => vec![value.clone()],
                };
                *entry = Some(Bson::Array(items));
            }
        }
    }

    Ok(*document != before)
}

/// Builds the document inserted by an upsert that matched nothing: the equality terms of the
/// filter's top-level conjunction.
pub(crate) fn seed(filter: &Expr) -> Document {
    let mut document = Document::new();
    collect_equalities(filter, &mut document);
    document
}

fn collect_equalities(filter: &Expr, into: &mut Document) {
    match filter {
        Expr::And(terms) => terms.iter().for_each(|term| collect_equalities(term, into)),
        Expr::Field { field, op: FieldOp::Eq, value } if !field.contains('.') => {
            into.insert(field.clone(), value.clone());
        }
        _ => {}
    }
}

fn add(field: &str, current: &Bson, by: &Bson) -> DocumentStoreResult<Bson> {
    Ok(match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Double(a), b) => Bson::Double(a + as_f64(field, b)?),
        (a, Bson::Double(b)) => Bson::Double(as_f64(field, a)? + b),
        (a, _) => {
            return Err(DocumentStoreError::StoreOperation(format!(
                "cannot increment non-numeric field {field} ({:?})",
                a.element_type()
            )));
        }
    })
}

fn as_f64(field: &str, value: &Bson) -> DocumentStoreResult<f64> {
    match value {
        Bson::Int32(v) => Ok(*v as f64),
        Bson::Int64(v) => Ok(*v as f64),
        Bson::Double(v) => Ok(*v),
        other => Err(DocumentStoreError::StoreOperation(format!(
            "cannot increment field {field} by non-numeric {:?}",
            other.element_type()
        ))),
    }
}

/// A writable view of one (possibly nested) field.
struct Slot<'a> {
    parent: &'a mut Document,
    key: String,
    value: Option<Bson>,
}

impl std::ops::Deref for Slot<'_> {
    type Target = Option<Bson>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl std::ops::DerefMut for Slot<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        match self.value.take() {
            Some(value) => {
                self.parent.insert(std::mem::take(&mut self.key), value);
            }
            None => {
                self.parent.remove(&self.key);
            }
        }
    }
}

/// Opens the field at a dotted path, creating intermediate documents as needed.
fn slot<'a>(document: &'a mut Document, path: &str) -> DocumentStoreResult<Slot<'a>> {
    let (parents, key) = match path.rsplit_once('.') {
        Some((parents, key)) => (Some(parents), key),
        None => (None, path),
    };

    let mut parent = document;
    for segment in parents.into_iter().flat_map(|parents| parents.split('.')) {
        let child = parent
            .entry(segment.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));
        parent = match child {
            Bson::Document(inner) => inner,
            other => {
                return Err(DocumentStoreError::StoreOperation(format!(
                    "cannot traverse {segment} of {path}: field is {:?}",
                    other.element_type()
                )));
            }
        };
    }

    let value = parent.get(key).cloned();
    Ok(Slot { parent, key: key.to_string(), value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docflow_core::query::Filter;

    #[test]
    fn applies_operators_in_order() {
        let mut document = doc! { "_id": 1, "age": 6, "tags": ["a"], "secret": true };
        let update = Update::new()
            .set("age", 10)
            .inc("age", 1)
            .push("tags", "b")
            .unset("secret")
            .set("address.city", "Oslo");

        assert!(apply(&mut document, &update).unwrap());
        assert_eq!(
            document,
            doc! { "_id": 1, "age": 11, "tags": ["a", "b"], "address": { "city": "Oslo" } }
        );
    }

    #[test]
    fn reports_unchanged_documents() {
        let mut document = doc! { "age": 10 };
        assert!(!apply(&mut document, &Update::new().set("age", 10)).unwrap());
    }

    #[test]
    fn rejects_id_changes_and_bad_kinds() {
        let mut document = doc! { "_id": 1, "name": "x" };
        assert!(apply(&mut document, &Update::new().set("_id", 2)).is_err());
        assert!(apply(&mut document, &Update::new().inc("name", 1)).is_err());
        assert!(apply(&mut document, &Update::new().push("name", 1)).is_err());
    }

    #[test]
    fn seeds_upserts_from_equality_terms() {
        let filter = Filter::eq("name", "alice").and(Filter::gt("age", 3)).and(Filter::eq("team", 7));
        assert_eq!(seed(&filter), doc! { "name": "alice", "team": 7 });
    }
}
