//! Reference and attachment core for a conversational assistant client.
//!
//! Messages carry a [`references::ReferenceSet`] of prior messages, files,
//! task responses, URL references and bare string outputs. The
//! [`resolver`] turns attach requests into references, [`views`] projects
//! them for display and [`draft`] tracks the message being composed.

pub mod auth;
pub mod client;
pub mod draft;
pub mod entities;
pub mod error;
pub mod navigation;
pub mod references;
pub mod resolver;
pub mod server;
pub mod session;
pub mod settings;
pub mod storage;
pub mod views;
