//! Utility functions for the application

pub mod api_key;
pub mod crypto;
pub mod duration;
pub mod time;
