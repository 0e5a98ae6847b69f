//! Domain services
//!
//! Core business logic services that operate on domain entities.

mod cancellation;
mod candidate_selection;
mod signature_registry;

pub use cancellation::CancellationToken;
pub use candidate_selection::{Selection, deduplicate, select_candidates};
pub use signature_registry::SignatureRegistry;
