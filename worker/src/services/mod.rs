pub mod reconciliation_scheduler;
