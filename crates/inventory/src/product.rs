use serde::{Deserialize, Serialize};

use fabline_core::{DomainError, DomainResult, Entity, ProductId};

/// Finished product kept in stock (a camera model).
///
/// Credited when a production run completes, debited when a unit is sent out
/// to replace a broken installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCamera {
    id: ProductId,
    name: String,
    amount_in_stock: i64,
}

impl ProductCamera {
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            amount_in_stock: 0,
        }
    }

    pub fn with_stock(mut self, amount_in_stock: i64) -> Self {
        self.amount_in_stock = amount_in_stock.max(0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount_in_stock(&self) -> i64 {
        self.amount_in_stock
    }

    pub fn credit(&mut self, units: i64) -> DomainResult<()> {
        if units <= 0 {
            return Err(DomainError::validation("credited units must be positive"));
        }
        self.amount_in_stock += units;
        Ok(())
    }

    /// Take one finished unit out of stock.
    pub fn debit_one(&mut self) -> DomainResult<()> {
        if self.amount_in_stock <= 0 {
            return Err(DomainError::insufficient_stock(format!(
                "no units of product {} in stock",
                self.id
            )));
        }
        self.amount_in_stock -= 1;
        Ok(())
    }
}

impl Entity for ProductCamera {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
