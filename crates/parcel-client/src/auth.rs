//! Account lifecycle: restoring the stored session at startup, signing in,
//! binding a destination and dropping to signed-out when the transport
//! rejects the credential.

use std::sync::Arc;

use tracing::{info, warn};

use parcel_net::{MessagingApi, TransportClient};
use parcel_shared::{Session, StorageDestination};
use parcel_store::{SessionStore, StoreError};

use crate::error::{DriveError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn(Session),
}

pub struct Account {
    store: SessionStore,
    state: AuthState,
}

impl Account {
    /// Load the persisted session. A missing or unreadable session file
    /// leaves the account signed out; an unreadable one is removed.
    pub fn restore(store: SessionStore) -> Self {
        let state = match store.load() {
            Ok(session) => {
                info!("session restored");
                AuthState::SignedIn(session)
            }
            Err(StoreError::NotFound) => AuthState::SignedOut,
            Err(e) => {
                warn!(error = %e, "stored session unreadable, signing out");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "failed to remove unreadable session");
                }
                AuthState::SignedOut
            }
        };
        Self { store, state }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            AuthState::SignedIn(session) => Some(session),
            AuthState::SignedOut => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, AuthState::SignedIn(_))
    }

    /// Store a freshly obtained credential. It is verified on [`Self::connect`].
    pub fn sign_in(&mut self, credential: impl Into<Vec<u8>>) -> Result<&Session> {
        let session = Session::new(credential);
        self.store.save(&session)?;
        self.state = AuthState::SignedIn(session);
        self.session().ok_or(DriveError::AuthExpired)
    }

    /// Build a transport client for the current session. A rejected
    /// credential signs the account out.
    pub async fn connect(&mut self, api: Arc<dyn MessagingApi>) -> Result<TransportClient> {
        let session = self.session().cloned().ok_or(DriveError::AuthExpired)?;
        match TransportClient::connect(api, session).await {
            Ok(client) => Ok(client),
            Err(e) => {
                let err = DriveError::from(e);
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    /// Resolve and bind `destination`, then persist the updated session.
    pub async fn bind_destination(
        &mut self,
        client: &TransportClient,
        destination: StorageDestination,
    ) -> Result<()> {
        let session = match client.select_destination(destination).await {
            Ok(session) => session,
            Err(e) => {
                let err = DriveError::from(e);
                self.handle_error(&err);
                return Err(err);
            }
        };
        self.store.save(&session)?;
        self.state = AuthState::SignedIn(session);
        Ok(())
    }

    /// Forget the session. The local index is left untouched.
    pub fn sign_out(&mut self) -> Result<()> {
        self.state = AuthState::SignedOut;
        self.store.clear()?;
        info!("signed out");
        Ok(())
    }

    /// Sign out when `err` means the credential is no longer valid.
    pub fn handle_error(&mut self, err: &DriveError) {
        if err.is_auth_expired() && self.is_signed_in() {
            if let Err(e) = self.sign_out() {
                warn!(error = %e, "failed to clear session after expiry");
            }
        }
    }
}
