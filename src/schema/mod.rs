//! Input feed schema
//!
//! This module defines the four tabular input feeds (stays, events,
//! antibiotics, sepsis episodes), their required columns, and the sources
//! that stream them into the pipeline.

mod records;
mod source;

pub use records::*;
pub use source::*;
