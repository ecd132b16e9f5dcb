//! Authentik API client
//!
//! A small blocking client for the parts of the Authentik v3 REST API used to
//! manage proxy providers, applications and outposts.
//!
//! # Architecture
//!
//! - **Transport**: sends one request and returns status + decoded JSON
//!   ([`UreqTransport`] for real servers, [`MockServer`] for tests)
//! - **Client**: typed endpoints, pagination, retry with exponential backoff
//! - **Error**: categorized errors carrying HTTP status and response body
//!
//! # Example
//!
//! ```no_run
//! use authentik::Client;
//!
//! let client = Client::connect("https://authentik.example.com", "token");
//! let user = client.whoami()?;
//! println!("authenticated as {user}");
//!
//! for outpost in client.list_outposts()? {
//!     println!("{} -> {:?}", outpost.name, outpost.providers);
//! }
//! # Ok::<(), authentik::Error>(())
//! ```

pub mod client;
pub mod error;
pub mod mock;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::Client;
pub use error::{Error, ErrorCategory, Result};
pub use mock::MockServer;
pub use retry::{LogCallback, NoCallback, RetryCallback, RetryConfig, with_retry};
pub use transport::{ApiRequest, Method, RawResponse, Transport, UreqTransport};
pub use types::{
    Application, ApplicationSpec, Collection, OAuth2Provider, Outpost, OutpostSpec, ProxyMode,
    ProxyProvider, ProxyProviderSpec, Token, User,
};
