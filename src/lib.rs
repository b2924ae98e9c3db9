//! Waveform slicing for SEISAN databases.
//!
//! Reads Nordic S-files and `ARC_CHAN` archive definitions, cuts fixed
//! windows around P/S picks (and STA/LTA-triggered noise) out of miniSEED
//! day archives, and packs the saved slices into a flat table.

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod mseed;
pub mod noise;
pub mod nordic;
pub mod pack;
pub mod resolver;
pub mod slicer;
pub mod stations;
pub mod stats;
pub mod store;
pub mod trace;
pub mod trigger;

pub use batch::{discover_source_files, BatchDriver, RunSummary, StartMode};
pub use catalog::{read_all_definitions, ArchiveRecord};
pub use config::Config;
pub use error::PickerError;
pub use resolver::ArchiveResolver;
