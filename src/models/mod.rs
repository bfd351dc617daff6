//! Data models

mod batch;
mod student;
mod template;
mod vm_config;

pub use batch::*;
pub use student::*;
pub use template::*;
pub use vm_config::*;
