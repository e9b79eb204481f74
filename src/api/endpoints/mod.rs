pub mod analyze;
pub mod health;
pub mod history;
pub mod patients;
pub mod report;
