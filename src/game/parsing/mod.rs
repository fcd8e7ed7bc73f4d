pub mod error;
pub mod import;
pub mod ksh;

pub use error::ImportError;
pub use import::import_chart;
