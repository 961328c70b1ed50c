//! Source-site scraping for Armory.
//!
//! This crate provides:
//! - [`WarpowerExtractor`]: fetches a country's category page and extracts units
//! - `parse`: selector-driven HTML extraction of unit blocks

pub mod engine;
mod parse;

pub use engine::WarpowerExtractor;
