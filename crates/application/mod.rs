pub mod payment_notifications;
pub mod payment_state_machine;
