pub mod rules;
pub mod serve;
pub mod status;
