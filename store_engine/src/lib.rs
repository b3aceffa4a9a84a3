//! Store Payment Engine
//!
//! The core library for the store backend. It contains the two subsystems everything else is plumbing around:
//!
//! 1. A specification-driven data-access layer ([`mod@specification`], [`mod@sqlite`]). Any entity implementing the
//!    [`db_types::Entity`] trait can be filtered, sorted, paged and projected through a [`Specification`] without
//!    per-entity query code. Writes are staged on a [`Repository`] and committed atomically through a [`UnitOfWork`].
//! 2. The payment-webhook reconciliation flow ([`mod@reconciler`], [`mod@webhook`]). A provider webhook is verified
//!    against the raw request bytes, the affected order is located by payment-intent id, the amount rule is applied,
//!    and the resulting status transition is committed exactly once. Settlement is then pushed to a live client
//!    connection on a best-effort basis ([`mod@notify`]).
//!
//! Payment-intent creation against the cart ([`mod@payments`]) rounds out the checkout flow.
pub mod db_types;
pub mod notify;
pub mod payments;
pub mod reconciler;
pub mod specification;
pub mod sqlite;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_utils;

pub use reconciler::{PaymentReconciler, ReconcileError, ReconcileOutcome};
pub use specification::{Specification, SpecificationEvaluator};
pub use sqlite::{Repository, StorageError, UnitOfWork};
