pub mod patient;
pub mod scan;

pub use patient::*;
pub use scan::*;
