//! Product catalog: stocked consumables and the stock clamp rule.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::Entity;
use crate::id::ProductId;

/// Product classification (wire values are the established display labels).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "Materiales")]
    Material,
    #[serde(rename = "Químicos")]
    Chemical,
    #[serde(rename = "Papel")]
    Paper,
    #[serde(rename = "EPP")]
    Ppe,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Material => "Materiales",
            Classification::Chemical => "Químicos",
            Classification::Paper => "Papel",
            Classification::Ppe => "EPP",
        }
    }
}

impl core::fmt::Display for Classification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// A stocked consumable.
///
/// `stock` is never negative. Remote increments are not clamped server-side,
/// so a document pushed back with a negative count is read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "marca")]
    pub brand: String,
    #[serde(rename = "unidad")]
    pub unit: String,
    #[serde(rename = "clasificacion")]
    pub classification: Classification,
    #[serde(rename = "stock_actual", deserialize_with = "non_negative")]
    pub stock: u32,
    #[serde(rename = "stock_minimo", deserialize_with = "non_negative")]
    pub min_stock: u32,
    #[serde(rename = "fecha_ingreso")]
    pub intake_date: NaiveDate,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Product {
    /// At or below the minimum threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }

    /// Decrement stock by `qty`, clamping at zero.
    pub fn withdraw(&mut self, qty: u32) {
        self.stock = self.stock.saturating_sub(qty);
    }
}

/// One line of a stock decrement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWithdrawal {
    pub product_id: ProductId,
    pub qty: u32,
}

impl StockWithdrawal {
    pub fn new(product_id: impl Into<ProductId>, qty: u32) -> Self {
        Self {
            product_id: product_id.into(),
            qty,
        }
    }
}

/// Apply withdrawals to a product list with `max(0, stock - qty)` per item.
///
/// Unknown product ids are ignored (the product may have been deleted on
/// another client).
pub fn apply_withdrawals(products: &mut [Product], withdrawals: &[StockWithdrawal]) {
    for w in withdrawals {
        if let Some(p) = products.iter_mut().find(|p| p.id == w.product_id) {
            p.withdraw(w.qty);
        }
    }
}

fn non_negative<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, u32::MAX as i64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product(stock: u32) -> Product {
        Product {
            id: ProductId::from("p1"),
            name: "Cloro Concentrado".to_string(),
            brand: "Clorox".to_string(),
            unit: "Litros".to_string(),
            classification: Classification::Chemical,
            stock,
            min_stock: 10,
            intake_date: NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
        }
    }

    #[test]
    fn withdraw_clamps_at_zero() {
        let mut products = vec![product(3)];
        apply_withdrawals(&mut products, &[StockWithdrawal::new("p1", 5)]);
        assert_eq!(products[0].stock, 0);
    }

    #[test]
    fn unknown_products_are_ignored() {
        let mut products = vec![product(3)];
        apply_withdrawals(&mut products, &[StockWithdrawal::new("gone", 1)]);
        assert_eq!(products[0].stock, 3);
    }

    #[test]
    fn low_stock_is_inclusive() {
        assert!(product(10).is_low_stock());
        assert!(!product(11).is_low_stock());
    }

    #[test]
    fn wire_names_are_stable() {
        let json = serde_json::to_value(product(50)).unwrap();
        assert_eq!(json["nombre"], "Cloro Concentrado");
        assert_eq!(json["clasificacion"], "Químicos");
        assert_eq!(json["stock_actual"], 50);
        assert_eq!(json["stock_minimo"], 10);
        assert_eq!(json["fecha_ingreso"], "2023-01-15");
    }

    #[test]
    fn negative_remote_stock_reads_as_zero() {
        let mut json = serde_json::to_value(product(1)).unwrap();
        json["stock_actual"] = serde_json::json!(-4);
        let p: Product = serde_json::from_value(json).unwrap();
        assert_eq!(p.stock, 0);
    }

    proptest! {
        #[test]
        fn stock_never_underflows(stock in 0u32..10_000, qtys in prop::collection::vec(0u32..500, 0..20)) {
            let mut products = vec![product(stock)];
            let withdrawals: Vec<_> = qtys.iter().map(|q| StockWithdrawal::new("p1", *q)).collect();
            apply_withdrawals(&mut products, &withdrawals);

            let total: u64 = qtys.iter().map(|q| *q as u64).sum();
            let expected = (stock as u64).saturating_sub(total) as u32;
            prop_assert_eq!(products[0].stock, expected);
        }
    }
}
