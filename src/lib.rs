pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;

pub use client::{AnthropicClient, MessagesApi};
pub use config::ProxyConfig;
pub use credentials::CredentialStore;
pub use error::{GatewayError, ProxyError, Result};
pub use logging::SharedLogger;
pub use proxy::Gateway;
pub use server::{build_router, AppState};
