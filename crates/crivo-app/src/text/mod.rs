//! Text utilities kept pure for reuse across parsing and chunking.
//!
//! Functions exposed here must remain side-effect free so they can be
//! composed from orchestrators without introducing hidden IO.

pub mod cleanup;

pub use cleanup::cleanup_segment_text;
