//! Budget enforcement: ledger ports, the pre-flight gate, cost
//! reconciliation and threshold alerts.
//!
//! - `BudgetLedger` / `SpendStore`: atomic-store ports implemented in infra
//! - `PreflightGate`: reserve-or-block with logged `BudgetCheck` records
//! - `CostAccountant` + `ExpirySweeper`: post-call reconciliation and
//!   reservation-leak reclamation
//! - `AlertDispatcher`: once-per-period threshold alerts
//! - `BudgetAdmin`: limit changes mirrored to the external limit key

pub mod accountant;
pub mod admin;
pub mod alert;
pub mod gate;
pub mod ledger;

#[cfg(test)]
pub(crate) mod testing;
