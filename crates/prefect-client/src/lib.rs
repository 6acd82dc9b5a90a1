//! [`StageExecutor`](sendpost_core::StageExecutor) over the Prefect 2 REST API.

pub mod client;
pub mod error;
pub mod types;

pub use client::PrefectClient;
pub use error::{PrefectError, Result};
