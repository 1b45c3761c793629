//! Active account tracking
//!
//! The signing provider is an explicit capability handed to the
//! [`SessionManager`]; nothing here reaches for ambient global state.

use async_trait::async_trait;
use memoledger_core::{Address, LedgerError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures reported by a signing provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request rejected by user")]
    Rejected,

    #[error("provider unavailable")]
    Unavailable,

    #[error("provider error: {0}")]
    Other(String),
}

/// Wallet capability that authorizes accounts and signs on their behalf
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Ask the user to authorize accounts; may prompt
    async fn request_accounts(&self) -> std::result::Result<Vec<Address>, ProviderError>;

    /// Accounts already authorized, without prompting
    async fn accounts(&self) -> std::result::Result<Vec<Address>, ProviderError>;
}

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected(Address),
}

impl SessionState {
    pub fn account(&self) -> Option<Address> {
        match self {
            SessionState::Connected(account) => Some(*account),
            SessionState::Disconnected => None,
        }
    }
}

/// Tracks the single active account
pub struct SessionManager {
    provider: RwLock<Option<Arc<dyn SigningProvider>>>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    /// Create a session manager; `None` means no provider was detected
    pub fn new(provider: Option<Arc<dyn SigningProvider>>) -> Self {
        Self {
            provider: RwLock::new(provider),
            state: RwLock::new(SessionState::Disconnected),
        }
    }

    /// Install a newly detected provider
    pub fn init(&self, provider: Arc<dyn SigningProvider>) {
        *self.provider.write() = Some(provider);
        debug!("Signing provider attached");
    }

    /// Drop the provider and forget the account
    pub fn teardown(&self) {
        self.disconnect();
        *self.provider.write() = None;
        debug!("Signing provider detached");
    }

    pub fn has_provider(&self) -> bool {
        self.provider.read().is_some()
    }

    fn provider(&self) -> Result<Arc<dyn SigningProvider>> {
        self.provider
            .read()
            .clone()
            .ok_or(LedgerError::WalletUnavailable)
    }

    /// Request account access and become `Connected`.
    ///
    /// Calling this while connected re-reads the provider's selection and
    /// follows it if it changed.
    pub async fn connect(&self) -> Result<Address> {
        let provider = match self.provider() {
            Ok(p) => p,
            Err(e) => {
                warn!("Connect requested without a signing provider");
                return Err(e);
            }
        };

        let accounts = provider.request_accounts().await.map_err(map_provider_error)?;
        let account = accounts.first().copied().ok_or(LedgerError::UserRejected)?;

        let previous = {
            let mut state = self.state.write();
            let previous = state.account();
            *state = SessionState::Connected(account);
            previous
        };

        match previous {
            Some(prev) if prev != account => info!("Active account changed {} -> {}", prev, account),
            Some(_) => debug!("Already connected as {}", account),
            None => info!("Connected as {}", account),
        }

        Ok(account)
    }

    /// Forget the active account. Local only; nothing is revoked.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Disconnected);
        if let SessionState::Connected(account) = previous {
            info!("Forgetting address {}", account);
        }
    }

    /// Passive check of already-authorized accounts; never prompts or
    /// changes the session state
    pub async fn check_connection(&self) -> Result<Option<Address>> {
        let provider = self.provider()?;
        let accounts = provider.accounts().await.map_err(map_provider_error)?;
        Ok(accounts.first().copied())
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn active_account(&self) -> Option<Address> {
        self.state.read().account()
    }

    pub fn is_connected(&self) -> bool {
        self.active_account().is_some()
    }

    /// Active account or `NotConnected`
    pub fn require_account(&self) -> Result<Address> {
        self.active_account().ok_or(LedgerError::NotConnected)
    }
}

fn map_provider_error(err: ProviderError) -> LedgerError {
    match err {
        ProviderError::Rejected => LedgerError::UserRejected,
        ProviderError::Unavailable => LedgerError::WalletUnavailable,
        ProviderError::Other(msg) => LedgerError::Transport(msg),
    }
}

/// Provider with a fixed set of authorized accounts
pub struct StaticProvider {
    accounts: RwLock<Vec<Address>>,
    authorized: RwLock<bool>,
    reject: RwLock<bool>,
}

impl StaticProvider {
    pub fn new(accounts: Vec<Address>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
            authorized: RwLock::new(false),
            reject: RwLock::new(false),
        }
    }

    /// Make subsequent `request_accounts` calls fail as if the user declined
    pub fn set_rejecting(&self, reject: bool) {
        *self.reject.write() = reject;
    }

    /// Switch the selected accounts, as a user would inside the wallet
    pub fn select_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.write() = accounts;
    }
}

#[async_trait]
impl SigningProvider for StaticProvider {
    async fn request_accounts(&self) -> std::result::Result<Vec<Address>, ProviderError> {
        if *self.reject.read() {
            return Err(ProviderError::Rejected);
        }
        *self.authorized.write() = true;
        Ok(self.accounts.read().clone())
    }

    async fn accounts(&self) -> std::result::Result<Vec<Address>, ProviderError> {
        if *self.authorized.read() {
            Ok(self.accounts.read().clone())
        } else {
            Ok(Vec::new())
        }
    }
}
