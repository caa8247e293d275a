//! Application wiring and background task lifecycle.

pub mod core;
pub mod services;
pub mod tasks;

pub use core::Application;
pub use services::ApplicationServices;
