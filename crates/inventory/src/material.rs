use serde::{Deserialize, Serialize};

use fabline_core::{DomainError, DomainResult, Entity, MaterialId, ProductId};

/// A consumable stock item used to build a product.
///
/// Two counters are tracked: units physically in stock and units ordered from
/// a supplier but not yet delivered. Neither counter may ever go negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    id: MaterialId,
    product_id: ProductId,
    name: String,
    amount_in_stock: i64,
    amount_ordered: i64,
}

impl Material {
    pub fn new(id: MaterialId, product_id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            product_id,
            name: name.into(),
            amount_in_stock: 0,
            amount_ordered: 0,
        }
    }

    pub fn with_stock(mut self, amount_in_stock: i64) -> Self {
        self.amount_in_stock = amount_in_stock.max(0);
        self
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount_in_stock(&self) -> i64 {
        self.amount_in_stock
    }

    pub fn amount_ordered(&self) -> i64 {
        self.amount_ordered
    }

    /// Whether `units` can be withdrawn without driving stock negative.
    pub fn can_supply(&self, units: i64) -> bool {
        self.amount_in_stock >= units
    }

    /// Add `amount` units to the pending-order counter.
    pub fn place_order(&mut self, amount: i64) -> DomainResult<()> {
        if amount <= 0 {
            return Err(DomainError::validation(format!(
                "order amount must be positive (got {amount})"
            )));
        }
        self.amount_ordered = self
            .amount_ordered
            .checked_add(amount)
            .ok_or_else(|| DomainError::invariant("ordered amount overflow"))?;
        Ok(())
    }

    /// Move a single delivered unit from the pending counter into stock.
    ///
    /// Returns `false` (and changes nothing) once nothing is pending.
    pub fn receive_one(&mut self) -> bool {
        if self.amount_ordered <= 0 {
            return false;
        }
        self.amount_ordered -= 1;
        self.amount_in_stock += 1;
        true
    }

    /// Withdraw `units` from stock.
    pub fn consume(&mut self, units: i64) -> DomainResult<()> {
        if units <= 0 {
            return Err(DomainError::validation("units to consume must be positive"));
        }
        if !self.can_supply(units) {
            return Err(DomainError::insufficient_stock(format!(
                "material {} holds {} units, {} required",
                self.id, self.amount_in_stock, units
            )));
        }
        self.amount_in_stock -= units;
        Ok(())
    }

    /// Put `units` back into stock (undo of a partial multi-material withdrawal).
    pub fn restore(&mut self, units: i64) -> DomainResult<()> {
        if units <= 0 {
            return Err(DomainError::validation("units to restore must be positive"));
        }
        self.amount_in_stock += units;
        Ok(())
    }
}

impl Entity for Material {
    type Id = MaterialId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn material(stock: i64) -> Material {
        Material::new(MaterialId::new(), ProductId::new(), "lens").with_stock(stock)
    }

    #[test]
    fn place_order_rejects_non_positive_amounts() {
        let mut m = material(0);
        assert!(matches!(m.place_order(0), Err(DomainError::Validation(_))));
        assert!(matches!(m.place_order(-3), Err(DomainError::Validation(_))));
        assert_eq!(m.amount_ordered(), 0);
    }

    #[test]
    fn receive_one_moves_a_single_unit() {
        let mut m = material(1);
        m.place_order(2).unwrap();

        assert!(m.receive_one());
        assert_eq!((m.amount_in_stock(), m.amount_ordered()), (2, 1));
        assert!(m.receive_one());
        assert!(!m.receive_one());
        assert_eq!((m.amount_in_stock(), m.amount_ordered()), (3, 0));
    }

    #[test]
    fn consume_never_goes_negative() {
        let mut m = material(1);
        let err = m.consume(2).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(m.amount_in_stock(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: draining an order restocks exactly the ordered amount.
        #[test]
        fn draining_orders_restocks_exact_amount(
            start in 0i64..1_000,
            orders in prop::collection::vec(1i64..50, 1..8)
        ) {
            let mut m = material(start);
            let total: i64 = orders.iter().sum();
            for amount in &orders {
                m.place_order(*amount).unwrap();
            }
            while m.receive_one() {}

            prop_assert_eq!(m.amount_in_stock(), start + total);
            prop_assert_eq!(m.amount_ordered(), 0);
        }

        /// Property: no sequence of consume calls drives stock below zero.
        #[test]
        fn stock_stays_non_negative(
            start in 0i64..20,
            withdrawals in prop::collection::vec(1i64..5, 0..20)
        ) {
            let mut m = material(start);
            for units in withdrawals {
                let _ = m.consume(units);
                prop_assert!(m.amount_in_stock() >= 0);
            }
        }
    }
}
