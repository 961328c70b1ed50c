//! Scrape orchestration for Armory.
//!
//! Ties the Warpower extractor, Sketchfab enrichment, and storage together
//! into background tasks that callers submit and poll through the
//! [`Dispatcher`].

pub mod dispatcher;
pub mod enrichment;
pub mod pipeline;
pub mod ports;
pub mod rate_limit;
pub mod registry;

#[cfg(test)]
mod testing;

pub use dispatcher::{CategoryRequest, Dispatcher, Submission, normalize_country};
pub use enrichment::SketchfabEnricher;
pub use pipeline::{Job, PipelineRunner};
pub use ports::{Enricher, Extractor, Store};
pub use rate_limit::RateLimiter;
pub use registry::TaskRegistry;
