//! At-rest protection for the refresh credential.

pub mod secrets;

pub use secrets::SecretStore;
