#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

//! Lab-test analytics: cohort statistics, hypothesis tests and patient clustering

pub mod csv_reader;
pub mod db;
pub mod error;
pub mod locale;
pub mod ml;
pub mod structs;
