//! Master calibrations: combining, selecting, comparing and applying them.

pub mod apply;
pub mod combine;
pub mod compare;
pub mod levels;
pub mod library;
pub mod select;
pub mod types;

pub use combine::combine;
pub use compare::{compare, ComparerParams, Comparison};
pub use library::{FitsMasterLoader, MasterLoader};
pub use select::select_master;
pub use types::{CalibrationType, CombinedMaster, MasterCalibration};
