//! Track reference data
//!
//! Reference laps per car class, used to turn distances on track into time.

pub mod curve;
pub mod store;

pub use self::curve::{LapSample, ReferenceCurve};
pub use self::store::{load_curve, DirectorySource, LapDataSource, NoLapData, ReferenceStore};
