//! Error types for the facade.

use appvirt_connection::ConnectionError;
use appvirt_provider::ProviderError;
use appvirt_store::StoreError;
use appvirt_sync::SyncError;

use crate::hooks::InterceptedApi;

/// Any failure surfaced by the facade.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] appvirt_core::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A hook was called with arguments for a different API.
    #[error("{api} hook received a {received} call")]
    MismatchedCall {
        api: InterceptedApi,
        received: InterceptedApi,
    },

    #[error("no hook installed for {api}")]
    NoHook { api: InterceptedApi },

    #[error("failed to install the {api} hook: {message}")]
    HookInstall { api: InterceptedApi, message: String },

    #[error("failed to start logging: {message}")]
    Logging { message: String },
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, AppError>;
