//! Withdrawal checkout: employee selection, cart and the Smart Lock gate.

use chrono::{DateTime, Utc};
use thiserror::Error;

use smartmaint_ai::{LockDecision, LockViolation, SmartLock};
use smartmaint_core::{Employee, EmployeeId, Product, ProductId, StockWithdrawal, Transaction, TransactionItem};

use crate::coordinator::{SyncCoordinator, SyncError};

/// Note recorded when a supervisor overrides without writing one.
pub const DEFAULT_OVERRIDE_NOTE: &str = "Autorizado por supervisor";

/// Product name recorded for cart lines whose product no longer exists.
pub const UNKNOWN_PRODUCT_NAME: &str = "Desconocido";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("no employee selected")]
    NoEmployeeSelected,
    #[error("employee {0} not found")]
    UnknownEmployee(EmployeeId),
    #[error("product {0} not found")]
    UnknownProduct(ProductId),
    #[error("cart is empty")]
    EmptyCart,
    #[error("product {product} is not permitted for employee {employee}")]
    ProductNotPermitted { employee: EmployeeId, product: ProductId },
    #[error("no blocked withdrawal to override")]
    NotBlocked,
    #[error("supervisor PIN mismatch")]
    PinMismatch,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Committed(Transaction),
    /// The Smart Lock held the cart; only a supervisor override can commit it.
    Blocked(LockViolation),
}

/// One checkout screen's state.
#[derive(Debug)]
pub struct CheckoutSession {
    sync: SyncCoordinator,
    lock: SmartLock,
    employee: Option<EmployeeId>,
    cart: Vec<StockWithdrawal>,
    blocked: Option<LockViolation>,
}

impl CheckoutSession {
    pub fn new(sync: SyncCoordinator) -> Self {
        Self::with_lock(sync, SmartLock::new())
    }

    pub fn with_lock(sync: SyncCoordinator, lock: SmartLock) -> Self {
        Self {
            sync,
            lock,
            employee: None,
            cart: Vec::new(),
            blocked: None,
        }
    }

    pub fn employee(&self) -> Option<&EmployeeId> {
        self.employee.as_ref()
    }

    pub fn cart(&self) -> &[StockWithdrawal] {
        &self.cart
    }

    pub fn blocked(&self) -> Option<&LockViolation> {
        self.blocked.as_ref()
    }

    /// Select who is withdrawing. Always starts from an empty cart.
    pub fn select_employee(&mut self, id: EmployeeId) -> Result<(), CheckoutError> {
        self.find_employee(&id)?;
        self.employee = Some(id);
        self.cart.clear();
        self.blocked = None;
        Ok(())
    }

    /// Add one unit of `product_id`; returns the line quantity afterwards.
    ///
    /// The quantity never exceeds current stock.
    pub fn add_to_cart(&mut self, product_id: &ProductId) -> Result<u32, CheckoutError> {
        let employee = self.selected_employee()?;
        if !employee.may_draw(product_id) {
            return Err(CheckoutError::ProductNotPermitted {
                employee: employee.id,
                product: product_id.clone(),
            });
        }

        let product = self.find_product(product_id)?;
        self.blocked = None;

        match self.cart.iter_mut().find(|l| l.product_id == *product_id) {
            Some(line) => {
                line.qty = (line.qty + 1).min(product.stock);
                Ok(line.qty)
            }
            None if product.stock == 0 => Ok(0),
            None => {
                self.cart.push(StockWithdrawal::new(product_id.clone(), 1));
                Ok(1)
            }
        }
    }

    /// Remove one unit; the line disappears at zero. Returns what is left.
    pub fn remove_from_cart(&mut self, product_id: &ProductId) -> u32 {
        let Some(idx) = self.cart.iter().position(|l| l.product_id == *product_id) else {
            return 0;
        };
        self.blocked = None;

        let line = &mut self.cart[idx];
        line.qty = line.qty.saturating_sub(1);
        let left = line.qty;
        if left == 0 {
            self.cart.remove(idx);
        }
        left
    }

    /// Run the Smart Lock and commit the cart if it passes.
    ///
    /// Lines whose product was deleted since it was added are not scored;
    /// they are still committed, under [`UNKNOWN_PRODUCT_NAME`].
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<CheckoutOutcome, CheckoutError> {
        let employee = self.selected_employee()?;
        if self.cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let products = self.sync.products()?;
        let stocked: Vec<StockWithdrawal> = self
            .cart
            .iter()
            .filter(|line| products.iter().any(|p| p.id == line.product_id))
            .cloned()
            .collect();

        let history = self.sync.transactions()?;
        match self.lock.evaluate(&employee, &stocked, &history, now) {
            LockDecision::Clear => self.commit(&employee, now, None).map(CheckoutOutcome::Committed),
            LockDecision::Blocked(violation) => {
                tracing::warn!(
                    employee = %employee.id,
                    product = %violation.product_id,
                    current = violation.current_week_total,
                    previous = violation.previous_week_total,
                    limit = violation.limit,
                    "smart lock blocked withdrawal"
                );
                self.blocked = Some(violation.clone());
                Ok(CheckoutOutcome::Blocked(violation))
            }
        }
    }

    /// Commit a blocked cart with the supervisor PIN.
    ///
    /// On a PIN mismatch nothing changes and the cart stays blocked.
    pub fn override_block(&mut self, pin: &str, note: &str, now: DateTime<Utc>) -> Result<Transaction, CheckoutError> {
        if self.blocked.is_none() {
            return Err(CheckoutError::NotBlocked);
        }
        if !self.sync.config()?.verify_pin(pin) {
            tracing::warn!("supervisor override rejected: PIN mismatch");
            return Err(CheckoutError::PinMismatch);
        }

        let note = match note.trim() {
            "" => DEFAULT_OVERRIDE_NOTE,
            note => note,
        };
        let employee = self.selected_employee()?;
        let tx = self.commit(&employee, now, Some(note))?;
        tracing::info!(employee = %employee.id, transaction = %tx.id, "supervisor override committed");
        Ok(tx)
    }

    fn commit(&mut self, employee: &Employee, now: DateTime<Utc>, override_note: Option<&str>) -> Result<Transaction, CheckoutError> {
        let products = self.sync.products()?;
        let items = self
            .cart
            .iter()
            .map(|line| TransactionItem {
                product_id: line.product_id.clone(),
                quantity: line.qty,
                product_name: products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string()),
            })
            .collect();

        let mut tx = Transaction::withdrawal(employee, items, now);
        if let Some(note) = override_note {
            tx = tx.with_override(note);
        }

        self.sync.add_transaction(tx.clone())?;
        self.sync.update_stock(&self.cart)?;

        self.employee = None;
        self.cart.clear();
        self.blocked = None;
        Ok(tx)
    }

    fn selected_employee(&self) -> Result<Employee, CheckoutError> {
        let id = self.employee.as_ref().ok_or(CheckoutError::NoEmployeeSelected)?;
        self.find_employee(id)
    }

    fn find_employee(&self, id: &EmployeeId) -> Result<Employee, CheckoutError> {
        self.sync
            .employees()?
            .into_iter()
            .find(|e| e.id == *id)
            .ok_or_else(|| CheckoutError::UnknownEmployee(id.clone()))
    }

    fn find_product(&self, id: &ProductId) -> Result<Product, CheckoutError> {
        self.sync
            .products()?
            .into_iter()
            .find(|p| p.id == *id)
            .ok_or_else(|| CheckoutError::UnknownProduct(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use smartmaint_events::CrossContextBroadcaster;

    use crate::cache::LocalCache;
    use crate::memory_remote::InMemoryRemoteStore;
    use crate::settings::SyncSettings;

    fn session() -> CheckoutSession {
        let sync = SyncCoordinator::new(
            LocalCache::open_in_memory().unwrap(),
            Arc::new(InMemoryRemoteStore::unreachable()),
            CrossContextBroadcaster::new(8),
            SyncSettings::with_data_dir("/unused"),
        )
        .unwrap();
        CheckoutSession::new(sync)
    }

    #[test]
    fn cart_requires_an_employee() {
        let mut s = session();
        assert!(matches!(
            s.add_to_cart(&ProductId::from("p1")),
            Err(CheckoutError::NoEmployeeSelected)
        ));
        assert!(matches!(s.submit(Utc::now()), Err(CheckoutError::NoEmployeeSelected)));
    }

    #[test]
    fn unpermitted_products_are_rejected() {
        let mut s = session();
        s.select_employee(EmployeeId::from("e2")).unwrap();
        // e2 may not draw p2
        assert!(matches!(
            s.add_to_cart(&ProductId::from("p2")),
            Err(CheckoutError::ProductNotPermitted { .. })
        ));
        assert!(s.cart().is_empty());
    }

    #[test]
    fn quantity_is_capped_at_stock() {
        let mut s = session();
        let mut products = s.sync.products().unwrap();
        products[1].stock = 2;
        s.sync.save_products(products).unwrap();

        s.select_employee(EmployeeId::from("e1")).unwrap();
        let p2 = ProductId::from("p2");
        assert_eq!(s.add_to_cart(&p2).unwrap(), 1);
        assert_eq!(s.add_to_cart(&p2).unwrap(), 2);
        assert_eq!(s.add_to_cart(&p2).unwrap(), 2);
        assert_eq!(s.remove_from_cart(&p2), 1);
        assert_eq!(s.remove_from_cart(&p2), 0);
        assert!(s.cart().is_empty());
    }

    #[test]
    fn selecting_another_employee_resets_the_cart() {
        let mut s = session();
        s.select_employee(EmployeeId::from("e1")).unwrap();
        s.add_to_cart(&ProductId::from("p1")).unwrap();
        s.select_employee(EmployeeId::from("e2")).unwrap();
        assert!(s.cart().is_empty());
        assert!(matches!(
            s.select_employee(EmployeeId::from("nobody")),
            Err(CheckoutError::UnknownEmployee(_))
        ));
    }

    #[test]
    fn clear_cart_commits_and_decrements_stock() {
        let mut s = session();
        let before = s.sync.products().unwrap()[0].stock;

        s.select_employee(EmployeeId::from("e2")).unwrap();
        s.add_to_cart(&ProductId::from("p1")).unwrap();
        s.add_to_cart(&ProductId::from("p1")).unwrap();

        let tx = match s.submit(Utc::now()).unwrap() {
            CheckoutOutcome::Committed(tx) => tx,
            CheckoutOutcome::Blocked(v) => panic!("unexpected block: {v}"),
        };

        assert_eq!(tx.employee_name, "Maria González");
        assert_eq!(tx.items[0].quantity, 2);
        assert!(!tx.anomaly_triggered);
        assert_eq!(s.sync.transactions().unwrap()[0], tx);
        assert_eq!(s.sync.products().unwrap()[0].stock, before - 2);
        assert!(s.employee().is_none());
    }

    #[test]
    fn override_without_block_is_rejected() {
        let mut s = session();
        assert!(matches!(
            s.override_block("1234", "", Utc::now()),
            Err(CheckoutError::NotBlocked)
        ));
    }
}
