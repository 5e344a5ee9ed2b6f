pub mod job_manager;
pub mod tools;
