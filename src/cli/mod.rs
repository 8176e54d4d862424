//! # CLI Module
//!
//! Command-line front end for the `brrtframe` binary. It builds a small demo
//! application on top of the framework and either serves it or prints its route
//! table.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! ```bash
//! brrtframe serve --host 0.0.0.0 --port 8080
//! ```
//!
//! Runs until Ctrl-C, then closes the instance (running every `onClose` hook).
//!
//! ### `routes`
//!
//! ```bash
//! brrtframe routes
//! ```
//!
//! ## Configuration
//!
//! `--config <FILE>` (or `BRRTF_CONFIG`) loads a YAML or TOML
//! [`FrameworkConfig`](crate::config::FrameworkConfig); `BRRTF_*` environment
//! variables override individual fields either way.

mod commands;
mod demo;


pub use commands::{run_cli, Cli, Commands};
pub use demo::build_demo_app;
