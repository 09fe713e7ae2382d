pub mod astrometry;
pub mod calibration;
pub mod consts;
pub mod detection;
pub mod error;
pub mod frame;
pub mod group;
pub mod io;
pub mod notify;
pub mod pipeline;
pub mod quality;
pub mod store;
pub mod tracking;
