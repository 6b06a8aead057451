pub mod predictions;
pub mod status;
