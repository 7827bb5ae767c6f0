pub mod reconcile_stale_payments;
