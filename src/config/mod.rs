pub mod schema;

pub use schema::{Config, IdentityConfig, MeteringConfig, QuotaConfig, SecretsConfig};
