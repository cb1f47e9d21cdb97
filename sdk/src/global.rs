//! Process-wide default client.
//!
//! Applications that do not want to thread a [`Client`] through their code
//! can install one with [`init`] at startup and reach it anywhere through
//! [`global`].

use std::sync::OnceLock;

use crate::client::Client;
use crate::config::Config;
use crate::error::ClientError;

static GLOBAL: OnceLock<Client> = OnceLock::new();

/// Builds a client from `config` and installs it as the global client.
///
/// The global client can be set once per process. Shut it down with
/// [`Client::shutdown`] before the runtime exits.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> Result<(), apilens::ClientError> {
/// let client = apilens::init(apilens::Config::new("my-api-key"))?;
/// client.counter("app.started", 1.0);
///
/// if let Some(client) = apilens::global() {
///     client.info("ready");
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`ClientError::AlreadyInitialized`] if a global client is
/// already installed, or any error from [`Client::new`].
pub fn init(config: Config) -> Result<&'static Client, ClientError> {
    if GLOBAL.get().is_some() {
        return Err(ClientError::AlreadyInitialized);
    }

    let client = Client::new(config)?;
    if GLOBAL.set(client).is_err() {
        tracing::warn!("Lost the race to install the global client");
        return Err(ClientError::AlreadyInitialized);
    }
    GLOBAL.get().ok_or(ClientError::AlreadyInitialized)
}

/// The client installed by [`init`], if any.
#[must_use]
pub fn global() -> Option<&'static Client> {
    GLOBAL.get()
}
