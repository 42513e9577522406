//! Per-attempt publish session state

use crate::protocol::constants::STREAM_ID_PUBLISH;

/// State of one publish attempt
///
/// Transaction ids are handed out in increasing order starting at 1. No reply
/// correlation is done; ids only need to be distinct.
#[derive(Debug, Clone)]
pub struct PublishSession {
    /// Application (target path) from the URL
    pub app: String,
    /// Stream key passed to releaseStream/publish
    pub stream_key: String,
    /// Message stream id media is published on
    pub stream_id: u32,
    next_transaction_id: u32,
    need_first_key_frame: bool,
}

impl PublishSession {
    pub fn new(app: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            stream_key: stream_key.into(),
            stream_id: STREAM_ID_PUBLISH,
            next_transaction_id: 1,
            need_first_key_frame: true,
        }
    }

    /// Allocate the next transaction id
    pub fn next_transaction_id(&mut self) -> u32 {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1;
        id
    }

    /// True until the first video key frame went out
    pub fn need_first_key_frame(&self) -> bool {
        self.need_first_key_frame
    }

    pub fn first_key_frame_sent(&mut self) {
        self.need_first_key_frame = false;
    }
}
