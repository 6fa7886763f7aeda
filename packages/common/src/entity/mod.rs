pub mod motion_data_file;
pub mod motion_job;
