//! Incremental build execution for kiln
//!
//! Takes a scanned [`SourceSet`](kiln_scan::SourceSet), its
//! [`Resolution`](kiln_graph::Resolution) and schedule, and drives a
//! [`BuildDriver`](kiln_cc::BuildDriver) through it:
//!
//! - [`gate`] decides from timestamps which files need compiling
//! - [`Build`] runs the levels in order, compiling each level in parallel,
//!   and links the result
//! - [`bootstrap_std_module`] adds the toolchain's `std` module source when
//!   the project imports it

mod bootstrap;
mod error;
mod executor;
pub mod gate;
mod observer;

pub use bootstrap::{STD_MODULES, bootstrap_std_module};
pub use error::BuildError;
pub use executor::{Build, BuildOutcome, BuildSettings, default_jobs};
pub use gate::{Staleness, is_up_to_date};
pub use observer::{BuildObserver, FileEvent, FileOutcome, NoopObserver};
