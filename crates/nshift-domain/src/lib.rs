pub mod canonical_id;
pub mod error;
pub mod types;

pub use canonical_id::CanonicalResourceId;
pub use error::DomainError;
pub use types::*;
