//! Read-only helpers for dashboards and reports.

use crate::catalog::Product;
use crate::id::EmployeeId;
use crate::personnel::Employee;
use crate::transaction::Transaction;

/// Products at or below their minimum threshold.
pub fn low_stock(products: &[Product]) -> Vec<&Product> {
    products.iter().filter(|p| p.is_low_stock()).collect()
}

/// Products the employee is permitted to draw, in catalog order.
pub fn allowed_products<'a>(employee: &Employee, products: &'a [Product]) -> Vec<&'a Product> {
    products.iter().filter(|p| employee.may_draw(&p.id)).collect()
}

/// An employee's withdrawals, newest first.
pub fn employee_history<'a>(transactions: &'a [Transaction], employee_id: &EmployeeId) -> Vec<&'a Transaction> {
    let mut history: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| &t.employee_id == employee_id)
        .collect();
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    history
}
