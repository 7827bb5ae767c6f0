pub mod config;
pub mod gateway;
pub mod momo_client;
pub mod signer;
pub mod verifier;
pub mod vnpay_client;
