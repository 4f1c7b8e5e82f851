pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grades;
pub mod scores;
pub mod students;
pub mod teachers;
