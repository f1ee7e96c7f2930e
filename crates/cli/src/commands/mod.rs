pub mod init;
pub mod pricing;
pub mod serve;
pub mod status;
pub mod usage;
