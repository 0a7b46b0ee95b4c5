#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;
use secrecy::SecretString;

use super::handler::Handlers;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of automatic reconnect attempts after an abnormal closure.
    /// Zero disables reconnection.
    pub max_attempts: u32,
    /// Delay before each reconnect attempt
    pub interval: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL)
    }
}

impl From<RetryPolicy> for Constant {
    fn from(policy: RetryPolicy) -> Self {
        Constant::new(policy.interval)
    }
}

/// Endpoint and credential captured by `connect` and replayed on every reconnect.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub url: String,
    /// Opaque credential forwarded as the handshake sub-protocol
    pub token: Option<SecretString>,
}

impl ConnectParams {
    #[must_use]
    pub fn new(url: String, token: Option<SecretString>) -> Self {
        Self { url, token }
    }
}

/// Options accepted by [`ConnectionManager::connect`](super::ConnectionManager::connect).
///
/// ```
/// use std::time::Duration;
///
/// use managed_socket::ws::{ConnectOptions, Handlers};
///
/// let options = ConnectOptions::builder()
///     .token("session-token")
///     .handlers(Handlers::new().on_message(|message| drop(message)))
///     .max_reconnect_attempts(2)
///     .reconnect_interval(Duration::from_millis(500))
///     .build();
///
/// assert_eq!(options.retry_policy().max_attempts, 2);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ConnectOptions {
    /// Credential forwarded to the transport handshake.
    #[builder(into)]
    pub token: Option<SecretString>,
    /// Handlers to register. Slots left empty keep the handler registered by an earlier call.
    #[builder(default)]
    pub handlers: Handlers,
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub reconnect_interval: Duration,
}

impl ConnectOptions {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_reconnect_attempts, self.reconnect_interval)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
