pub mod adjustment;
pub mod calibration;
pub mod coherence;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod half_time;
pub mod logging;
pub mod markets;
pub mod params;
pub mod types;
