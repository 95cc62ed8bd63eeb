use super::Transaction;
use crate::{
    error::ValidationError,
    spec::{INITIAL_SORT_ORDER_ID, NullOrder, SortDirection, SortField, SortOrder, Transform},
    update::{LAST_ADDED, TableRequirement, TableUpdate},
};

/// Builds a sort order from scratch and makes it the table default.
///
/// Committing without any field makes the table unsorted.
#[derive(Debug)]
pub struct ReplaceSortOrder<'t> {
    transaction: &'t mut Transaction,
    fields: Vec<SortField>,
}

impl<'t> ReplaceSortOrder<'t> {
    pub(crate) fn new(transaction: &'t mut Transaction) -> Self {
        Self {
            transaction,
            fields: Vec::new(),
        }
    }

    pub fn asc(
        &mut self,
        column: &str,
        null_order: NullOrder,
    ) -> Result<&mut Self, ValidationError> {
        self.add_sort_field(column, Transform::Identity, SortDirection::Ascending, null_order)
    }

    pub fn desc(
        &mut self,
        column: &str,
        null_order: NullOrder,
    ) -> Result<&mut Self, ValidationError> {
        self.add_sort_field(column, Transform::Identity, SortDirection::Descending, null_order)
    }

    pub fn add_sort_field(
        &mut self,
        column: &str,
        transform: Transform,
        direction: SortDirection,
        null_order: NullOrder,
    ) -> Result<&mut Self, ValidationError> {
        let schema = self.transaction.metadata().current_schema();
        let field = schema.field_by_name(column).ok_or_else(|| {
            ValidationError::for_key(format!("Cannot find sort column `{column}`"), column)
        })?;
        let Some(source_type) = field.field_type.as_primitive() else {
            return Err(ValidationError::for_key(
                format!("Cannot sort by non-primitive column `{column}`"),
                column,
            ));
        };
        if !transform.can_transform(source_type) {
            return Err(ValidationError::for_key(
                format!(
                    "Transform {transform} cannot be applied to `{column}` of type {source_type}"
                ),
                column,
            ));
        }
        let source_id = field.id;
        self.fields.push(SortField {
            source_id,
            transform,
            direction,
            null_order,
        });
        Ok(self)
    }

    /// The order as it would be added. The catalog side assigns the final id.
    pub fn apply(&self) -> Result<SortOrder, ValidationError> {
        if self.fields.is_empty() {
            return Ok(SortOrder::unsorted());
        }
        let order = SortOrder::new(INITIAL_SORT_ORDER_ID, self.fields.clone());
        order.validate(self.transaction.metadata().current_schema())?;
        Ok(order)
    }

    pub fn commit(self) -> Result<(), ValidationError> {
        let sort_order = self.apply()?;
        if sort_order.fields == self.transaction.metadata().default_sort_order().fields {
            return Ok(());
        }
        let requirements = vec![TableRequirement::DefaultSortOrderIdMatch {
            default_sort_order_id: self.transaction.base_metadata().default_sort_order_id(),
        }];
        self.transaction.stage(
            vec![
                TableUpdate::AddSortOrder { sort_order },
                TableUpdate::SetDefaultSortOrder {
                    sort_order_id: LAST_ADDED,
                },
            ],
            requirements,
        )
    }
}
