//! secretsctx: a Lambda extension that resolves SSM parameters and Secrets
//! Manager secrets and injects them into every invocation's client context.
//!
//! The binary wires these modules together; integration tests in `tests/`
//! use them directly.

pub mod aws;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod extension;
pub mod process;
pub mod proxy;
pub mod secrets;
