//! Huddle core library: backend client, conversation state, attachment staging, message
//! composition and rendering shared by the CLI and desktop front ends.

pub mod api;
pub mod compose;
pub mod config;
pub mod controller;
pub mod init;
pub mod render;
pub mod staging;
pub mod store;
