pub mod enums;
pub mod patient;
pub mod scan;

pub use enums::*;
pub use patient::*;
pub use scan::*;
