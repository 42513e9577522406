//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes) -------------->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|  (optional)
//! ```
//!
//! C1 layout: epoch (4 bytes, always 0), version (4 bytes, 0 for the simple
//! handshake) and a 1528-byte random challenge.
//!
//! By default the publisher sends C0/C1 and never reads the reply: the
//! inbound reader simply discards S0S1S2. With the full handshake enabled,
//! [`Handshake::process_reply`] validates S0 and produces C2.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_CHALLENGE_SIZE, HANDSHAKE_SIZE, RTMP_VERSION};

/// Size of the server's S0 + S1 + S2 reply
pub const SERVER_REPLY_SIZE: usize = 1 + HANDSHAKE_SIZE * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Nothing sent yet
    Initial,
    /// C0C1 sent, waiting for S0S1S2
    WaitingForReply,
    /// C2 produced
    Done,
}

/// Client handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    challenge: Option<Bytes>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initial,
            challenge: None,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Produce the random challenge region of C1
    ///
    /// Must be called once, before the challenge is sent.
    pub fn generate_challenge(&mut self) -> Result<Bytes> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }
        let challenge = generate_challenge();
        self.challenge = Some(challenge.clone());
        self.state = HandshakeState::WaitingForReply;
        Ok(challenge)
    }

    /// The challenge sent in C1, if generated
    pub fn challenge(&self) -> Option<&Bytes> {
        self.challenge.as_ref()
    }

    /// Process S0S1S2 and return C2
    ///
    /// Returns Ok(None) until the full reply has been buffered; nothing is
    /// consumed in that case. S2 is not compared with C1, servers are not
    /// consistent about echoing it.
    pub fn process_reply(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::WaitingForReply {
            return Err(HandshakeError::InvalidState.into());
        }
        if data.len() < SERVER_REPLY_SIZE {
            return Ok(None);
        }

        // S0: Version check, lenient for 3-31
        let version = data.get_u8();
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        // S1 is echoed back verbatim as C2
        let c2 = data.split_to(HANDSHAKE_SIZE).freeze();
        data.advance(HANDSHAKE_SIZE);

        self.state = HandshakeState::Done;
        Ok(Some(c2))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random C1 challenge region
pub fn generate_challenge() -> Bytes {
    let mut challenge = vec![0u8; HANDSHAKE_CHALLENGE_SIZE];
    rand::thread_rng().fill_bytes(&mut challenge);
    Bytes::from(challenge)
}
