//! Address planning module.
//!
//! This module derives node labels from addresses, walks address cursors
//! through the management network and assigns every cluster a disjoint
//! range of it.

pub mod error;
pub mod label;
pub mod registry;
pub mod allocator;

// Re-export commonly used types
pub use error::PlanError;
pub use label::{advance, label_from_address, DEFAULT_LABEL_LEN};
pub use registry::AddressRegistry;
pub use allocator::{AllocationSummary, ClusterAllocator, ADDRESS_UNITS_PER_HOST};
