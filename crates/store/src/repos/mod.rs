//! Repository traits for backend operations.

pub mod leases;
pub mod records;

pub use leases::LeaseRepo;
pub use records::RecordRepo;
