//! Row structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - The `Deserialize` input DTOs accepted by the coordinator

pub mod lock;
pub mod lock_request;
