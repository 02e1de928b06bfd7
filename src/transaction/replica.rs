//! Replica-side acknowledgment
//!
//! When a replica of the object is activated on a participant, it answers the
//! coordinator exactly once. Whether that answer could be sent decides the
//! replica's fate: `Prepared` on success, `Aborted` otherwise. There is no
//! retry and no local timeout beyond the per-send bound.

use std::time::Duration;

use tracing::{debug, warn};

use super::messages::CreateResponse;
use super::peer::{ObjectId, PeerId};
use super::sequence::SequenceCounter;
use super::transport::{send_within, PeerTransport};
use crate::error::SendError;

/// Sends a replica's vote back to the coordinator
#[derive(Debug)]
pub struct ReplicaResponder {
    local: PeerId,
    home: PeerId,
    object_id: ObjectId,
    sequence: SequenceCounter,
}

impl ReplicaResponder {
    /// Create a responder for `local`, answering to the coordinator `home`
    pub fn new(local: PeerId, home: PeerId, object_id: ObjectId) -> Self {
        Self {
            local,
            home,
            object_id,
            sequence: SequenceCounter::new(),
        }
    }

    /// Coordinator this replica answers to
    pub fn home(&self) -> &PeerId {
        &self.home
    }

    /// Send one acknowledgment to the coordinator
    ///
    /// `failure` carries a local creation failure, if any. Returns the
    /// sequence number the acknowledgment was sent with.
    ///
    /// # Errors
    ///
    /// Returns the [`SendError`] when the transport fails or does not finish
    /// within `send_timeout`.
    pub async fn acknowledge(
        &self,
        transport: &dyn PeerTransport,
        failure: Option<String>,
        send_timeout: Duration,
    ) -> Result<i64, SendError> {
        let sequence = self.sequence.next();
        let response = CreateResponse {
            from: self.local.clone(),
            object_id: self.object_id.clone(),
            sequence,
            failure_cause: failure,
        };

        debug!(
            object = %self.object_id,
            home = %self.home,
            sequence,
            success = response.is_success(),
            "Sending create response to coordinator"
        );

        match send_within(
            &self.home,
            send_timeout,
            transport.send_create_response(&self.home, &response),
        )
        .await
        {
            Ok(()) => Ok(sequence),
            Err(e) => {
                warn!(object = %self.object_id, home = %self.home, sequence, error = %e, "Create response not delivered");
                Err(e)
            }
        }
    }
}
