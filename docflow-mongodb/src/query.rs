//! Translation of filter expressions into MongoDB query documents.

use bson::{Bson, Document, doc};

use docflow_core::{
    error::DocumentStoreError,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Translates filter expressions into MongoDB's query syntax.
///
/// String operators become escaped, case-sensitive regular expressions, anchored for prefix and
/// suffix matches.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    pub fn translate(expr: &Expr) -> Result<Document, DocumentStoreError> {
        MongoQueryTranslator.visit_expr(expr)
    }
}

fn string_operand<'a>(op: &str, value: &'a Bson) -> Result<&'a str, DocumentStoreError> {
    match value {
        Bson::String(s) => Ok(s),
        other => Err(DocumentStoreError::StoreOperation(format!(
            "{op} requires a string value, got {:?}",
            other.element_type()
        ))),
    }
}

fn matching(pattern: String) -> Document {
    doc! { "$regex": pattern }
}

fn as_array(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        single => Bson::Array(vec![single.clone()]),
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, terms: &[Expr]) -> Result<Self::Output, Self::Error> {
        if terms.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": terms
                .iter()
                .map(|term| self.visit_expr(term))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, terms: &[Expr]) -> Result<Self::Output, Self::Error> {
        if terms.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! {
            "$or": terms
                .iter()
                .map(|term| self.visit_expr(term))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, inner: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(inner)?],
        })
    }

    fn visit_exists(&mut self, field: &str, present: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": present },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => matching(regex::escape(s)),
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$eq": other },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": matching(regex::escape(s)) },
                    Bson::Array(arr) => doc! { "$not": { "$all": arr } },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => matching(format!("^{}", regex::escape(string_operand("starts_with", value)?))),
                FieldOp::EndsWith => matching(format!("{}$", regex::escape(string_operand("ends_with", value)?))),
                FieldOp::AnyOf => doc! { "$in": as_array(value) },
                FieldOp::NoneOf => doc! { "$nin": as_array(value) },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::query::Filter;

    #[test]
    fn empty_conjunction_matches_everything() {
        assert_eq!(MongoQueryTranslator::translate(&Filter::all()).unwrap(), doc! {});
    }

    #[test]
    fn negation_uses_nor() {
        let translated = MongoQueryTranslator::translate(&Filter::eq("age", 6).not()).unwrap();
        assert_eq!(translated, doc! { "$nor": [{ "age": { "$eq": 6 } }] });
    }

    #[test]
    fn string_operators_escape_their_operand() {
        let translated = MongoQueryTranslator::translate(&Filter::starts_with("email", "a.b+")).unwrap();
        assert_eq!(translated, doc! { "email": { "$regex": "^a\\.b\\+" } });

        assert!(MongoQueryTranslator::translate(&Filter::ends_with("email", 3)).is_err());
    }

    #[test]
    fn set_operators_wrap_scalars() {
        let translated = MongoQueryTranslator::translate(
            &Filter::any_of("tag", "a").and(Filter::none_of("tag", vec!["b", "c"])),
        )
        .unwrap();
        assert_eq!(
            translated,
            doc! { "$and": [{ "tag": { "$in": ["a"] } }, { "tag": { "$nin": ["b", "c"] } }] }
        );
    }
}
