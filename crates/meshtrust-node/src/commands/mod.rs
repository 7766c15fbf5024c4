pub mod identity;
pub mod init;
pub mod peers;
pub mod run;
