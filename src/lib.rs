// Insteon PowerLinc driver - shared library
// Configuration file and device catalog loading

pub mod catalog;
pub mod config;

pub use config::DriverConfig;
