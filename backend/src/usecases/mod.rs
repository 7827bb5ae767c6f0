pub mod payment_callbacks;
pub mod payments;
