pub mod auth;
pub mod calc;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod enrollments;
pub mod setup;
pub mod students;
