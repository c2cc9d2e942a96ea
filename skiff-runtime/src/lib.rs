//! Skiff runtime client
//!
//! Polls the host's Runtime API for invocations, dispatches each one to a
//! registered handler, and posts the formatted result or a structured error
//! back to the host. The protocol is strictly one invocation at a time.

pub mod client;
pub mod context;
pub mod env;
pub mod error;
pub mod handler;
pub mod response;

pub use client::{ClientError, Invocation, RuntimeClient};
pub use context::{Clock, Context, SystemClock};
pub use env::{EnvError, RuntimeEnv};
pub use error::ErrorReport;
pub use handler::{FnHandler, Handler, HandlerError, HandlerRegistry, LoadError};
pub use response::{
    classify, format_http_shaped, format_standard, FormatError, FormattedResponse, ResponseKind,
};
