//! Destination address resolution with a read-mostly cache.
//!
//! Resolution order for a [`DestinationId`]:
//! 1. the reserved `self` literal maps to the authenticated user, no lookup;
//! 2. the cache;
//! 3. the transport's native entity lookup;
//! 4. the numeric fallback (`-100<id>` channel, `-<id>` group, `<id>` peer).
//!
//! Concurrent misses for the same id are collapsed behind a per-id gate, so
//! only the first caller performs the lookup and the rest read its result
//! from the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use parcel_shared::DestinationId;

use crate::api::{MessagingApi, PeerAddress};
use crate::error::{Result, TransportError};

pub struct AddressResolver {
    api: Arc<dyn MessagingApi>,
    self_address: PeerAddress,
    cache: RwLock<HashMap<DestinationId, PeerAddress>>,
    inflight: Mutex<HashMap<DestinationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AddressResolver {
    pub fn new(api: Arc<dyn MessagingApi>, self_address: PeerAddress) -> Self {
        Self {
            api,
            self_address,
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn self_address(&self) -> PeerAddress {
        self.self_address
    }

    pub async fn resolve(&self, id: &DestinationId) -> Result<PeerAddress> {
        if id.is_self() {
            return Ok(self.self_address);
        }
        if let Some(address) = self.cached(id) {
            return Ok(address);
        }

        let gate = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            inflight.entry(id.clone()).or_default().clone()
        };
        let _turn = gate.lock().await;

        // another caller may have finished the lookup while we waited
        if let Some(address) = self.cached(id) {
            return Ok(address);
        }

        let result = self.lookup(id).await;
        if let Ok(address) = &result {
            self.seed(id.clone(), *address);
        }
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        result
    }

    /// Insert a known address, e.g. from the destination listing.
    pub fn seed(&self, id: DestinationId, address: PeerAddress) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, address);
    }

    pub fn invalidate(&self, id: &DestinationId) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn cached(&self, id: &DestinationId) -> Option<PeerAddress> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    async fn lookup(&self, id: &DestinationId) -> Result<PeerAddress> {
        match self.api.lookup_entity(id.as_str()).await {
            Ok(address) => return Ok(address),
            Err(TransportError::AuthExpired) => return Err(TransportError::AuthExpired),
            Err(e) => debug!(destination = %id, error = %e, "native lookup failed, trying numeric id"),
        }

        let peer = id
            .parse_numeric()
            .map_err(|e| TransportError::Resolution(format!("{id}: {e}")))?;

        self.api.lookup_peer(peer).await.map_err(|e| match e {
            TransportError::AuthExpired => TransportError::AuthExpired,
            other => TransportError::Resolution(format!("{id}: {other}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessenger;
    use parcel_shared::NumericPeer;

    fn setup() -> (Arc<MemoryMessenger>, AddressResolver) {
        let api = Arc::new(MemoryMessenger::new(b"c".to_vec(), 1));
        let resolver = AddressResolver::new(api.clone(), api.me());
        (api, resolver)
    }

    #[tokio::test]
    async fn test_self_needs_no_lookup() {
        let (api, resolver) = setup();
        let address = resolver.resolve(&DestinationId::self_notes()).await.unwrap();
        assert_eq!(address, api.me());
        assert_eq!(api.calls().lookup_entity, 0);
        assert_eq!(api.calls().lookup_peer, 0);
    }

    #[tokio::test]
    async fn test_native_lookup_is_cached() {
        let (api, resolver) = setup();
        let expected = api.add_peer(NumericPeer::Channel(77), "Vault", Some("vault"));

        let id = DestinationId::new("vault");
        assert_eq!(resolver.resolve(&id).await.unwrap(), expected);
        assert_eq!(resolver.resolve(&id).await.unwrap(), expected);
        assert_eq!(api.calls().lookup_entity, 1);
    }

    #[tokio::test]
    async fn test_numeric_fallback() {
        let (api, resolver) = setup();
        let expected = api.add_peer(NumericPeer::Channel(77), "Vault", None);

        let address = resolver.resolve(&DestinationId::new("-10077")).await.unwrap();
        assert_eq!(address, expected);
        assert_eq!(api.calls().lookup_entity, 1);
        assert_eq!(api.calls().lookup_peer, 1);
    }

    #[tokio::test]
    async fn test_failure_is_resolution_error_and_not_cached() {
        let (api, resolver) = setup();

        let err = resolver.resolve(&DestinationId::new("nobody")).await.unwrap_err();
        assert!(matches!(err, TransportError::Resolution(_)));

        let err = resolver.resolve(&DestinationId::new("-10099")).await.unwrap_err();
        assert!(matches!(err, TransportError::Resolution(_)));
        assert!(resolver.cached(&DestinationId::new("-10099")).is_none());

        // once the peer becomes reachable the next call succeeds
        api.add_peer(NumericPeer::Channel(99), "Late", None);
        assert!(resolver.resolve(&DestinationId::new("-10099")).await.is_ok());
    }

    #[tokio::test]
    async fn test_auth_expired_is_not_masked() {
        let (api, resolver) = setup();
        api.revoke_credential();
        let err = resolver.resolve(&DestinationId::new("-10077")).await.unwrap_err();
        assert_eq!(err, TransportError::AuthExpired);
    }

    #[tokio::test]
    async fn test_concurrent_misses_single_flight() {
        let (api, resolver) = setup();
        api.add_peer(NumericPeer::Group(5), "Team", Some("team"));
        let id = DestinationId::new("team");

        let (a, b, c) = tokio::join!(resolver.resolve(&id), resolver.resolve(&id), resolver.resolve(&id));
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(api.calls().lookup_entity, 1);
    }

    #[tokio::test]
    async fn test_seed_and_invalidate() {
        let (api, resolver) = setup();
        let address = api.add_peer(NumericPeer::User(9), "Bob", None);
        let id = DestinationId::new("9");

        resolver.seed(id.clone(), address);
        assert_eq!(resolver.resolve(&id).await.unwrap(), address);
        assert_eq!(api.calls().lookup_entity, 0);

        resolver.invalidate(&id);
        assert!(resolver.cached(&id).is_none());
    }
}
