use bytes::Bytes;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// The unit of work handed from the segment builder to the rest of the
/// worker. Payloads are always in-memory — this crate never touches disk.
#[derive(Debug, Clone)]
pub struct Segment {
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub kind: MediaKind,
    pub batch_number: u64,
    pub t0_ns: u64,
    pub duration_ns: u64,
    pub payload: Bytes,
    /// Populated only for audio segments once STS returns dubbed audio.
    pub dubbed_payload: Option<Bytes>,
}

impl Segment {
    pub fn new(
        stream_id: impl Into<String>,
        kind: MediaKind,
        batch_number: u64,
        t0_ns: u64,
        duration_ns: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            fragment_id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            kind,
            batch_number,
            t0_ns,
            duration_ns,
            payload,
            dubbed_payload: None,
        }
    }

    pub fn end_t0_ns(&self) -> u64 {
        self.t0_ns + self.duration_ns
    }

    pub fn is_dubbed(&self) -> bool {
        self.dubbed_payload.is_some()
    }

    /// The payload that should be pushed to the output pipeline: dubbed
    /// audio if present, otherwise the original (pass-through fallback).
    pub fn output_payload(&self) -> &Bytes {
        self.dubbed_payload.as_ref().unwrap_or(&self.payload)
    }

    pub fn set_dubbed(&mut self, dubbed: Bytes) {
        self.dubbed_payload = Some(dubbed);
    }
}
