pub mod appointment_statuses;
pub mod gateways;
pub mod payment_methods;
pub mod payment_statuses;
