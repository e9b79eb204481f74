pub mod analysis;
pub mod classifier;
pub mod diagnosis;
pub mod preprocess;
