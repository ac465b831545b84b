//! # uiscout
//!
//! Crawl a site, inventory its interactive elements, and learn from test
//! outcomes which interactions to recommend. The heavy lifting lives in
//! [`uiscout_crawler`] and [`uiscout_learning`]; this crate wires them into
//! the `uiscout` command line.

pub mod commands;

pub use uiscout_crawler as crawler;
pub use uiscout_learning as learning;
