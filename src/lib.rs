//! Supervise a long-running server process and relay commands into it.
//!
//! The [`supervisor`] owns the worker and its shutdown protocol and runs on a
//! single control loop fed by the [`mailbox`]. Clients reach it through a
//! [`connection::ServiceLink`]: in process via [`service::LocalLink`], or
//! over a Unix socket via [`ipc::IpcLink`].

pub mod cli;
#[cfg(unix)]
pub mod client;
pub mod config;
pub mod connection;
#[cfg(unix)]
pub mod ipc;
pub mod log;
pub mod mailbox;
pub mod notification;
pub mod paths;
pub mod runner;
pub mod service;
pub mod shell_completion;
pub mod supervisor;
pub mod surface;
pub mod terminate;
/// Scenario-test public surface: scripted worker and recording fakes.
#[cfg(any(test, feature = "scenario-test"))]
pub mod testkit;
pub mod worker;
