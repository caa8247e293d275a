mod build_info;
pub mod logging;
pub mod shutdown;
pub mod version;
