use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use smartmaint_core::{Employee, ProductId, StockWithdrawal, Transaction};

/// Why a withdrawal was blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockViolation {
    pub product_id: ProductId,
    pub product_name: String,
    pub limit: u32,
    /// Proposed quantity plus this week's history.
    pub current_week_total: u64,
    pub previous_week_total: u64,
}

impl LockViolation {
    pub fn reason(&self) -> String {
        format!(
            "security lock: excessive use of {} ({}) for 2 consecutive weeks (limit: {})",
            self.product_name, self.product_id, self.limit
        )
    }
}

impl core::fmt::Display for LockViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Smart Lock verdict for a proposed cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockDecision {
    Clear,
    Blocked(LockViolation),
}

impl LockDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, LockDecision::Blocked(_))
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            LockDecision::Clear => None,
            LockDecision::Blocked(v) => Some(v.reason()),
        }
    }
}

/// Consumption-anomaly gate for withdrawals.
///
/// Model:
/// - Split the employee's recent history into the current window
///   `[now - window, ..)` and the previous one `[now - 2*window, now - window)`.
/// - Per product in the cart, the current total includes the proposed quantity.
/// - Block when **both** totals exceed the employee's alert limit. A single
///   heavy week is ordinary restocking; two in a row for the same product is
///   the diversion signal.
/// - Products are checked in cart order and the first offender is reported.
///
/// Every cart line is scored; callers drop lines for products that left the
/// catalogue before evaluating (see `CheckoutSession::submit`).
#[derive(Debug, Clone)]
pub struct SmartLock {
    window: Duration,
}

impl Default for SmartLock {
    fn default() -> Self {
        Self {
            window: Duration::days(7),
        }
    }
}

impl SmartLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn evaluate(
        &self,
        employee: &Employee,
        cart: &[StockWithdrawal],
        history: &[Transaction],
        now: DateTime<Utc>,
    ) -> LockDecision {
        let one_window_ago = now - self.window;
        let two_windows_ago = one_window_ago - self.window;

        let recent: Vec<&Transaction> = history
            .iter()
            .filter(|t| t.employee_id == employee.id && t.timestamp >= two_windows_ago)
            .collect();

        let limit = employee.alert_limit as u64;

        for (product_id, proposed) in distinct_lines(cart) {
            let mut current_week_total = proposed;
            let mut previous_week_total = 0u64;
            let mut product_name: Option<&str> = None;

            for t in &recent {
                let qty = t.quantity_of(product_id);
                if qty == 0 {
                    continue;
                }
                if t.timestamp >= one_window_ago {
                    current_week_total += qty;
                } else {
                    previous_week_total += qty;
                }
                if product_name.is_none() {
                    product_name = t
                        .items
                        .iter()
                        .find(|i| i.product_id == *product_id)
                        .map(|i| i.product_name.as_str());
                }
            }

            if current_week_total > limit && previous_week_total > limit {
                return LockDecision::Blocked(LockViolation {
                    product_id: product_id.clone(),
                    product_name: product_name.unwrap_or(product_id.as_str()).to_string(),
                    limit: employee.alert_limit,
                    current_week_total,
                    previous_week_total,
                });
            }
        }

        LockDecision::Clear
    }
}

/// Collapse repeated cart lines per product, keeping first-seen order.
fn distinct_lines(cart: &[StockWithdrawal]) -> Vec<(&ProductId, u64)> {
    let mut lines: Vec<(&ProductId, u64)> = Vec::with_capacity(cart.len());
    for line in cart {
        match lines.iter_mut().find(|(id, _)| *id == &line.product_id) {
            Some((_, qty)) => *qty += line.qty as u64,
            None => lines.push((&line.product_id, line.qty as u64)),
        }
    }
    lines
}
