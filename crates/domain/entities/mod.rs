pub mod appointments;
pub mod payments;
