//! Microsoft Graph access: authenticated requests, retries and paging

pub mod client;
pub mod error;
pub mod pagination;

pub use client::{GraphBody, GraphClient, GraphRequest, GraphResponse, RetryPolicy};
pub use error::GraphError;
pub use pagination::{collect, Collected};
