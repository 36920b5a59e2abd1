//! Terminals over literal values.

use std::cmp::Ordering;

use super::{Items, Query};
use crate::error::{ExecutionError, GraphError, GraphResult, ValidationError};
use crate::value::Value;

impl Query<Value> {
    /// Sum of every value. An empty sequence sums to `Int(0)`.
    ///
    /// # Errors
    /// `IncompatibleValues` when two values cannot be added, for example
    /// quantities in different units.
    pub fn sum(self) -> GraphResult<Value> {
        let total = self.fold(None::<Value>, |acc, value| match acc {
            None => Ok(Some(value)),
            Some(acc) => acc
                .checked_add(&value)
                .map(Some)
                .map_err(|e| GraphError::from(e).in_stage("sum", &value)),
        })?;
        Ok(total.unwrap_or(Value::Int(0)))
    }

    /// The single value.
    ///
    /// # Errors
    /// `NotFound` when there is none, `MultipleValues` when there is more
    /// than one.
    pub fn single(self) -> GraphResult<Value> {
        let label = self.label().to_string();
        self.maybe()?
            .ok_or_else(|| GraphError::not_found(format!("value for {label}")))
    }

    /// The single value if there is one.
    ///
    /// # Errors
    /// `MultipleValues` when there is more than one.
    pub fn maybe(self) -> GraphResult<Option<Value>> {
        let mut values = self.evaluate()?;
        match values.len() {
            0 | 1 => Ok(values.pop()),
            found => Err(ExecutionError::MultipleValues { found }.into()),
        }
    }

    /// The single value, or `default` when there is none.
    pub fn value_or(self, default: Value) -> GraphResult<Value> {
        Ok(self.maybe()?.unwrap_or(default))
    }

    /// The smallest value, if any.
    pub fn min(self) -> GraphResult<Option<Value>> {
        self.extreme("min", Ordering::Less)
    }

    /// The largest value, if any.
    pub fn max(self) -> GraphResult<Option<Value>> {
        self.extreme("max", Ordering::Greater)
    }

    fn extreme(self, stage: &'static str, wanted: Ordering) -> GraphResult<Option<Value>> {
        self.fold(None::<Value>, |best, value| {
            let Some(best) = best else {
                return Ok(Some(value));
            };
            match value.partial_cmp(&best) {
                Some(order) if order == wanted => Ok(Some(value)),
                Some(_) => Ok(Some(best)),
                None => Err(GraphError::from(ValidationError::IncompatibleValues {
                    reason: format!(
                        "cannot compare {} with {}",
                        value.type_name(),
                        best.type_name()
                    ),
                })
                .in_stage(stage, &value)),
            }
        })
    }

    /// Stable sort in ascending order. Materializes the input.
    ///
    /// Evaluation fails with `IncompatibleValues` if any two values cannot
    /// be ordered: different kinds, different units or enum types, or NaN.
    #[must_use]
    pub fn sort(self) -> Self {
        self.then("sort", |items, _| -> Items<Value> {
            let mut all = match items.collect::<GraphResult<Vec<Value>>>() {
                Ok(all) => all,
                Err(e) => return Box::new(std::iter::once(Err(e))),
            };
            if let Some(e) = first_incomparable(&all) {
                return Box::new(std::iter::once(Err(e)));
            }
            // Every pair is comparable here, so this is a total order.
            all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            Box::new(all.into_iter().map(Ok))
        })
    }
}

/// Comparability is shared within a kind (ints and floats together, one
/// unit, one enum type), so checking every value against the first and
/// against itself covers every pair.
fn first_incomparable(values: &[Value]) -> Option<GraphError> {
    let first = values.first()?;
    values.iter().find_map(|value| {
        let reason = if value.partial_cmp(value).is_none() {
            format!("cannot order {value}")
        } else if first.partial_cmp(value).is_none() {
            format!("cannot order {} against {}", value.type_name(), first.type_name())
        } else {
            return None;
        };
        Some(GraphError::from(ValidationError::IncompatibleValues { reason }).in_stage("sort", value))
    })
}
