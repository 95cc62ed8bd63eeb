use serde::{Deserialize, Serialize};

use super::{
    partition::Transform,
    schema::{Schema, primitive_source},
};
use crate::error::ValidationError;

/// Reserved id of the unsorted order.
pub const UNSORTED_ORDER_ID: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullOrder {
    #[serde(rename = "nulls-first")]
    First,
    #[serde(rename = "nulls-last")]
    Last,
}

impl NullOrder {
    /// Nulls sort first ascending and last descending unless specified.
    #[must_use]
    pub fn default_for(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Ascending => NullOrder::First,
            SortDirection::Descending => NullOrder::Last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortField {
    pub source_id: i32,
    pub transform: Transform,
    pub direction: SortDirection,
    pub null_order: NullOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortOrder {
    pub order_id: i32,
    pub fields: Vec<SortField>,
}

pub type SortOrderRef = std::sync::Arc<SortOrder>;

impl SortOrder {
    #[must_use]
    pub fn unsorted() -> Self {
        Self {
            order_id: UNSORTED_ORDER_ID,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn new(order_id: i32, fields: Vec<SortField>) -> Self {
        Self { order_id, fields }
    }

    #[must_use]
    pub fn is_unsorted(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn validate(&self, schema: &Schema) -> Result<(), ValidationError> {
        if self.is_unsorted() && self.order_id != UNSORTED_ORDER_ID {
            return Err(ValidationError::new(format!(
                "Sort order {} has no fields, only order {UNSORTED_ORDER_ID} may be unsorted",
                self.order_id
            )));
        }
        if !self.is_unsorted() && self.order_id == UNSORTED_ORDER_ID {
            return Err(ValidationError::new(format!(
                "Sort order id {UNSORTED_ORDER_ID} is reserved for the unsorted order"
            )));
        }
        for field in &self.fields {
            let Some(source) = primitive_source(schema, field.source_id) else {
                return Err(ValidationError::for_key(
                    format!(
                        "Sort field references unknown or non-primitive source field {}",
                        field.source_id
                    ),
                    field.source_id.to_string(),
                ));
            };
            if !field.transform.can_transform(source) {
                return Err(ValidationError::for_key(
                    format!(
                        "Transform {} cannot be applied to sort source {} of type {source}",
                        field.transform, field.source_id
                    ),
                    field.source_id.to_string(),
                ));
            }
        }
        Ok(())
    }
}
