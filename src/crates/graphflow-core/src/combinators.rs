//! `combine`: concatenates several list-typed references into one
//! [`CombinedConnection`] (spec.md §4.7).
//!
//! `znflow.combine.combine` auto-flattens a single positional list/tuple
//! argument one level (`combine([a, b, c]) == combine(a, b, c)`); the
//! distilled spec drops this but the original behavior is preserved here
//! through [`IntoCombineArgs`].

use crate::reference::{CombinedConnection, Reference};

/// Converts a call site's arguments into the ordered list of references
/// `combine` should concatenate, auto-flattening a single list/array
/// argument one level.
pub trait IntoCombineArgs {
    fn into_combine_args(self) -> Vec<Reference>;
}

impl<R: Into<Reference>> IntoCombineArgs for Vec<R> {
    fn into_combine_args(self) -> Vec<Reference> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<R: Into<Reference>, const N: usize> IntoCombineArgs for [R; N] {
    fn into_combine_args(self) -> Vec<Reference> {
        self.into_iter().map(Into::into).collect()
    }
}

macro_rules! impl_combine_args_tuple {
    ($($ty:ident),+) => {
        impl<$($ty: Into<Reference>),+> IntoCombineArgs for ($($ty,)+) {
            #[allow(non_snake_case)]
            fn into_combine_args(self) -> Vec<Reference> {
                let ($($ty,)+) = self;
                vec![$($ty.into()),+]
            }
        }
    };
}

impl_combine_args_tuple!(A);
impl_combine_args_tuple!(A, B);
impl_combine_args_tuple!(A, B, C);
impl_combine_args_tuple!(A, B, C, D);
impl_combine_args_tuple!(A, B, C, D, E);
impl_combine_args_tuple!(A, B, C, D, E, F);

/// Concatenates the given list-typed references into a single
/// [`CombinedConnection`], in order.
///
/// Accepts either a tuple of references (`combine((a, b, c))`) or a single
/// `Vec`/array of references (`combine(vec![a, b, c])`), matching
/// `znflow.combine.combine`'s auto-flattening of one positional list
/// argument.
pub fn combine(args: impl IntoCombineArgs) -> CombinedConnection {
    CombinedConnection::new(args.into_combine_args())
}

/// Wraps a reference so its realized list is reshaped into a JSON object
/// keyed by `key_field`, for downstream consumers that want a lookup table
/// instead of a plain list (spec.md §4.7, `as_map_key`).
///
/// Fails at resolve time (not here) if the realized value is not a list of
/// objects, or if `key_field` produces a duplicate key.
pub fn as_map_key(reference: impl Into<Reference>, key_field: impl Into<String>) -> MapKeyed {
    MapKeyed { inner: reference.into(), key_field: key_field.into() }
}

/// A reference reshaped by [`as_map_key`]. Resolves to a JSON object
/// instead of a JSON array.
#[derive(Debug, Clone)]
pub struct MapKeyed {
    inner: Reference,
    key_field: String,
}

impl MapKeyed {
    pub fn resolve_json(&self, store: &dyn crate::deployment::ResultStore) -> crate::error::Result<serde_json::Value> {
        use crate::error::GraphFlowError;
        use serde_json::Value;

        let resolved = self.inner.resolve_json(store)?;
        let Value::Array(items) = resolved else {
            return Err(GraphFlowError::Value(
                "as_map_key requires the reference to resolve to a list".into(),
            ));
        };
        let mut map = serde_json::Map::with_capacity(items.len());
        for item in items {
            let key = item
                .get(&self.key_field)
                .ok_or_else(|| GraphFlowError::Value(format!("list item has no field '{}'", self.key_field)))?;
            let key = match key {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if map.insert(key.clone(), item).is_some() {
                return Err(GraphFlowError::Value(format!("duplicate key '{key}' in as_map_key")));
            }
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Connection;
    use uuid::Uuid;

    #[test]
    fn combine_from_tuple_preserves_order() {
        let a = Connection::to_task(Uuid::new_v4());
        let b = Connection::to_task(Uuid::new_v4());
        let combined = combine((a.clone(), b.clone()));
        assert_eq!(combined.elements().len(), 2);
    }

    #[test]
    fn combine_from_vec_flattens_one_level() {
        let refs: Vec<Reference> = vec![
            Connection::to_task(Uuid::new_v4()).into(),
            Connection::to_task(Uuid::new_v4()).into(),
            Connection::to_task(Uuid::new_v4()).into(),
        ];
        let combined = combine(refs);
        assert_eq!(combined.elements().len(), 3);
    }
}
