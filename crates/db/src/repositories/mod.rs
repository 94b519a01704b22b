//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async statements that
//! accept `&mut PgConnection` as the first argument. Pass `&mut *tx` to run
//! them inside an open transaction.

pub mod lock_repo;
pub mod lock_request_repo;

pub use lock_repo::LockRepo;
pub use lock_request_repo::LockRequestRepo;
