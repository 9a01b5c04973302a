use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use dubbing_segment::Segment;

/// A segment tracked while the STS service is processing it. The timeout is
/// driven by a detached task rather than a handle stored inside the map
/// entry — the race between a normal completion and a timeout firing is
/// resolved by whichever side removes the map entry first.
pub struct InFlightFragment {
    pub fragment_id: Uuid,
    pub segment: Segment,
    pub sequence_number: u64,
    pub sent_at: Instant,
    _timeout_handle: JoinHandle<()>,
}

pub enum TimeoutEvent {
    Fired { fragment_id: Uuid, segment: Segment },
}

struct Inner {
    map: HashMap<Uuid, InFlightFragment>,
    next_sequence: u64,
}

/// Bounded in-flight fragment table. `max_inflight` is
/// enforced on `track`; timeouts are reported through `on_timeout` rather
/// than returned from `track`, since the timeout fires asynchronously long
/// after the call that started tracking.
#[derive(Clone)]
pub struct FragmentTracker {
    inner: Arc<Mutex<Inner>>,
    max_inflight: usize,
    timeout: Duration,
    timeout_tx: mpsc::UnboundedSender<TimeoutEvent>,
}

impl FragmentTracker {
    /// Returns the tracker plus a receiver that yields one `TimeoutEvent`
    /// per fragment whose timer fires before `complete` is called.
    pub fn new(
        max_inflight: usize,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TimeoutEvent>) {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            inner: Arc::new(Mutex::new(Inner {
                map: HashMap::new(),
                next_sequence: 0,
            })),
            max_inflight,
            timeout,
            timeout_tx,
        };
        (tracker, timeout_rx)
    }

    pub fn has_capacity(&self) -> bool {
        self.inner.lock().map.len() < self.max_inflight
    }

    pub fn inflight_count(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Begin tracking `segment`. Fails with `None` if the tracker is at
    /// capacity — the caller should treat `None` as `CapacityExceeded`.
    pub fn track(&self, segment: Segment) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.map.len() >= self.max_inflight {
            return None;
        }

        let fragment_id = segment.fragment_id;
        let sequence_number = inner.next_sequence;
        inner.next_sequence += 1;

        let timeout = self.timeout;
        let inner_arc = self.inner.clone();
        let timeout_tx = self.timeout_tx.clone();
        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let removed = {
                let mut inner = inner_arc.lock();
                inner.map.remove(&fragment_id)
            };
            if let Some(entry) = removed {
                let _ = timeout_tx.send(TimeoutEvent::Fired {
                    fragment_id,
                    segment: entry.segment,
                });
            }
        });

        inner.map.insert(
            fragment_id,
            InFlightFragment {
                fragment_id,
                segment,
                sequence_number,
                sent_at: Instant::now(),
                _timeout_handle: timeout_handle,
            },
        );
        Some(sequence_number)
    }

    /// Completes a fragment normally. Cancels its timeout and returns the
    /// entry, or `None` if it already timed out (or was never tracked).
    pub fn complete(&self, fragment_id: Uuid) -> Option<InFlightFragment> {
        let mut inner = self.inner.lock();
        let entry = inner.map.remove(&fragment_id)?;
        entry._timeout_handle.abort();
        Some(entry)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for (_, entry) in inner.map.drain() {
            entry._timeout_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dubbing_segment::MediaKind;

    fn segment() -> Segment {
        Segment::new(
            "s1",
            MediaKind::Audio,
            0,
            0,
            1_000_000_000,
            Bytes::from_static(b"aac"),
        )
    }

    #[tokio::test]
    async fn track_respects_capacity() {
        let (tracker, _rx) = FragmentTracker::new(1, Duration::from_secs(60));
        assert!(tracker.track(segment()).is_some());
        assert!(!tracker.has_capacity());
        assert!(tracker.track(segment()).is_none());
    }

    #[tokio::test]
    async fn complete_cancels_timeout() {
        tokio::time::pause();
        let (tracker, mut rx) = FragmentTracker::new(3, Duration::from_millis(50));
        let seg = segment();
        let fragment_id = seg.fragment_id;
        tracker.track(seg);
        assert!(tracker.complete(fragment_id).is_some());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn timeout_fires_and_removes_entry() {
        tokio::time::pause();
        let (tracker, mut rx) = FragmentTracker::new(3, Duration::from_millis(10));
        let seg = segment();
        let fragment_id = seg.fragment_id;
        tracker.track(seg);
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        let event = rx.recv().await.unwrap();
        match event {
            TimeoutEvent::Fired {
                fragment_id: fid, ..
            } => assert_eq!(fid, fragment_id),
        }
        assert_eq!(tracker.inflight_count(), 0);
        assert!(tracker.complete(fragment_id).is_none());
    }
}
