//! Contact handshake
//!
//! A request is `pending` until its receiver responds. Accepting writes two
//! mirrored contact records and deletes the request in one atomic batch;
//! ignoring only deletes it. Responding to a request that no longer exists is
//! a no-op.

use crate::core_store::model::{
    ContactRecord, ContactRequest, ContactStatus, Credential, HandshakeDecision, Identity,
    IdentityId, RequestId, Timestamp,
};
use crate::core_store::store::collections::{self, CONTACTS, REQUESTS};
use crate::core_store::store::{Batch, Filter, RemoteStore, Subscription};
use crate::core_access::access_gate::normalize_handle;
use crate::errors::{VeilError, VeilResult};
use crate::metrics::{self, HANDSHAKES_ACCEPTED, HANDSHAKES_IGNORED, HANDSHAKES_SENT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a response actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted,
    Ignored,
    /// The request was already resolved
    AlreadyResolved,
}

/// A contact joined with the counterpart's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactView {
    pub record: ContactRecord,
    pub identity: Identity,
}

pub struct HandshakeCoordinator {
    store: Arc<dyn RemoteStore>,
}

impl HandshakeCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn send_request(&self, sender: &Identity, target_handle: &str) -> VeilResult<ContactRequest> {
        let handle = normalize_handle(target_handle).map_err(|_| VeilError::TargetNotFound)?;
        let target: Credential = collections::fetch(self.store.as_ref(), &handle)
            .await?
            .ok_or(VeilError::TargetNotFound)?;
        if target.identity_id == sender.id {
            return Err(VeilError::InvalidInput("cannot send a request to yourself".into()));
        }

        let request = ContactRequest {
            id: RequestId::generate(),
            sender_id: sender.id.clone(),
            sender_handle: sender.handle.clone(),
            receiver_id: target.identity_id,
            status: ContactStatus::Pending,
            created_at: Timestamp::now(),
            handshake_fingerprint: generate_fingerprint(),
        };
        collections::put(self.store.as_ref(), request.id.as_str(), &request).await?;

        info!(
            request_id = %request.id,
            receiver = %request.receiver_id,
            fingerprint = %request.handshake_fingerprint,
            "contact request sent"
        );
        metrics::record_counter(HANDSHAKES_SENT, 1);
        Ok(request)
    }

    pub async fn respond(
        &self,
        responder: &IdentityId,
        request_id: &RequestId,
        decision: HandshakeDecision,
    ) -> VeilResult<HandshakeOutcome> {
        let request: ContactRequest =
            match collections::fetch(self.store.as_ref(), request_id.as_str()).await? {
                Some(request) => request,
                None => {
                    debug!(request_id = %request_id, "request already resolved");
                    return Ok(HandshakeOutcome::AlreadyResolved);
                }
            };
        if &request.receiver_id != responder {
            return Err(VeilError::NotPermitted("only the receiver may respond".into()));
        }

        let mut batch = Batch::new().require_exists(REQUESTS, request_id.as_str());
        if decision == HandshakeDecision::Accept {
            let record = ContactRecord {
                owner_id: request.sender_id.clone(),
                counterpart_id: request.receiver_id.clone(),
                status: ContactStatus::Accepted,
                handshake_fingerprint: request.handshake_fingerprint.clone(),
                added_at: Timestamp::now(),
            };
            let mirror = record.mirror();
            batch = batch
                .set(CONTACTS, &record.document_id(), collections::encode(&record)?)
                .set(CONTACTS, &mirror.document_id(), collections::encode(&mirror)?);
        }
        batch = batch.delete(REQUESTS, request_id.as_str());

        if !self.store.commit(batch).await? {
            debug!(request_id = %request_id, "request resolved concurrently");
            return Ok(HandshakeOutcome::AlreadyResolved);
        }

        match decision {
            HandshakeDecision::Accept => {
                info!(request_id = %request_id, "contact request accepted");
                metrics::record_counter(HANDSHAKES_ACCEPTED, 1);
                Ok(HandshakeOutcome::Accepted)
            }
            HandshakeDecision::Ignore => {
                info!(request_id = %request_id, "contact request ignored");
                metrics::record_counter(HANDSHAKES_IGNORED, 1);
                Ok(HandshakeOutcome::Ignored)
            }
        }
    }

    /// Requests waiting on `receiver`, oldest first
    pub async fn pending_requests(&self, receiver: &IdentityId) -> VeilResult<Vec<ContactRequest>> {
        let requests: Vec<ContactRequest> =
            collections::find(self.store.as_ref(), &pending_filters(receiver)).await?;
        Ok(order_requests(requests))
    }

    /// Push feed of [`Self::pending_requests`]
    pub async fn subscribe_requests(&self, receiver: &IdentityId) -> VeilResult<RequestFeed> {
        let subscription = self
            .store
            .subscribe(REQUESTS, pending_filters(receiver))
            .await?;
        Ok(RequestFeed { subscription })
    }

    /// Accepted contacts of `owner` with their identities.
    /// Records whose counterpart identity is gone are skipped.
    pub async fn contacts(&self, owner: &IdentityId) -> VeilResult<Vec<ContactView>> {
        let records: Vec<ContactRecord> = collections::find(
            self.store.as_ref(),
            &[Filter::eq("ownerId", owner.as_str())],
        )
        .await?;

        let mut views = Vec::with_capacity(records.len());
        for record in records {
            let identity: Option<Identity> =
                collections::fetch(self.store.as_ref(), record.counterpart_id.as_str()).await?;
            match identity {
                Some(identity) => views.push(ContactView { record, identity }),
                None => warn!(counterpart = %record.counterpart_id, "contact without identity"),
            }
        }
        views.sort_by(|a, b| a.identity.handle.cmp(&b.identity.handle));
        Ok(views)
    }

    pub async fn is_contact(&self, owner: &IdentityId, counterpart: &IdentityId) -> VeilResult<bool> {
        let record: Option<ContactRecord> =
            collections::fetch(self.store.as_ref(), &ContactRecord::key(owner, counterpart)).await?;
        Ok(matches!(record, Some(r) if r.status == ContactStatus::Accepted))
    }
}

/// Live view of pending requests
pub struct RequestFeed {
    subscription: Subscription,
}

impl RequestFeed {
    pub async fn next(&mut self) -> Option<VeilResult<Vec<ContactRequest>>> {
        let entries = self.subscription.recv().await?;
        Some(
            collections::decode_all(entries)
                .map(order_requests)
                .map_err(VeilError::from),
        )
    }
}

fn pending_filters(receiver: &IdentityId) -> Vec<Filter> {
    vec![
        Filter::eq("receiverId", receiver.as_str()),
        Filter::eq("status", ContactStatus::Pending.as_str()),
    ]
}

fn order_requests(mut requests: Vec<ContactRequest>) -> Vec<ContactRequest> {
    requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    requests
}

/// `HS-` and four uppercase hex digits
pub fn generate_fingerprint() -> String {
    let mut bytes = [0u8; 2];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
    format!("HS-{}", hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::model::contact::is_handshake_fingerprint;

    #[test]
    fn test_fingerprint_format() {
        for _ in 0..100 {
            assert!(is_handshake_fingerprint(&generate_fingerprint()));
        }
    }

    #[test]
    fn test_order_requests() {
        let base = ContactRequest {
            id: RequestId::new("req_b"),
            sender_id: IdentityId::new("u_a"),
            sender_handle: "a".into(),
            receiver_id: IdentityId::new("u_b"),
            status: ContactStatus::Pending,
            created_at: Timestamp::from_millis(20),
            handshake_fingerprint: "HS-0000".into(),
        };
        let mut earlier = base.clone();
        earlier.id = RequestId::new("req_a");
        earlier.created_at = Timestamp::from_millis(10);

        let ordered = order_requests(vec![base, earlier]);
        assert_eq!(ordered[0].id.as_str(), "req_a");
    }
}
