//! Simulated exchange accounts.

pub mod account;

pub use account::PaperAccount;
