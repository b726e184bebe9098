//! In-process transport.
//!
//! A [`MemoryRouter`] owns one unbounded mpsc channel per
//! `(src, dest, tag)` triple, created lazily on first use; a
//! [`MemoryChannel`] is one rank's endpoint onto the router. This is the
//! transport behind the in-process cluster and every integration test, and
//! it still frames everything through the versioned [`Envelope`] so the
//! wire discipline is exercised end to end.

use crate::comm::wire::Envelope;
use crate::comm::CommChannel;
use crate::types::{Rank, Tag, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

type Key = (Rank, Rank, u32);

struct Slot {
    tx: UnboundedSender<Vec<u8>>,
    /// Taken out while a receiver is waiting on it, restored afterwards.
    rx: Option<UnboundedReceiver<Vec<u8>>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Shared in-process message router for a fixed-size rank group.
pub struct MemoryRouter {
    world_size: u32,
    slots: Mutex<HashMap<Key, Slot>>,
}

impl MemoryRouter {
    pub fn new(world_size: u32) -> Arc<Self> {
        assert!(world_size > 0, "world size must be greater than 0");
        Arc::new(Self {
            world_size,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// The endpoint for one rank. Cheap; endpoints share the router.
    pub fn endpoint(self: &Arc<Self>, rank: Rank) -> MemoryChannel {
        debug_assert!(rank.0 < self.world_size);
        MemoryChannel {
            rank,
            router: Arc::clone(self),
        }
    }

    fn sender(&self, key: Key) -> UnboundedSender<Vec<u8>> {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        slots.entry(key).or_insert_with(Slot::new).tx.clone()
    }

    fn take_receiver(
        &self,
        key: Key,
    ) -> Result<UnboundedReceiver<Vec<u8>>, TransportError> {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        let slot = slots.entry(key).or_insert_with(Slot::new);
        slot.rx.take().ok_or(TransportError::ReceiverBusy {
            src: key.0,
            tag: Tag(key.2),
        })
    }

    fn put_receiver(&self, key: Key, rx: UnboundedReceiver<Vec<u8>>) {
        let mut slots = self.slots.lock().expect("router lock poisoned");
        if let Some(slot) = slots.get_mut(&key) {
            slot.rx = Some(rx);
        }
    }
}

/// One rank's endpoint onto a [`MemoryRouter`].
#[derive(Clone)]
pub struct MemoryChannel {
    rank: Rank,
    router: Arc<MemoryRouter>,
}

impl MemoryChannel {
    fn unwrap_frame(
        &self,
        frame: Vec<u8>,
        src: Rank,
        tag: Tag,
    ) -> Result<Vec<u8>, TransportError> {
        Envelope::decode(&frame)?.open(src, tag)
    }
}

#[async_trait]
impl CommChannel for MemoryChannel {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.router.world_size
    }

    async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError> {
        let frame = Envelope::new(self.rank, tag, payload).encode()?;
        trace!(src = %self.rank, %dest, %tag, bytes = frame.len(), "send");
        self.router
            .sender((self.rank, dest, tag.as_u32()))
            .send(frame)
            .map_err(|_| TransportError::SendFailed {
                dest,
                tag,
                reason: "receiving endpoint is gone".into(),
            })
    }

    async fn receive(&self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError> {
        let key = (src, self.rank, tag.as_u32());
        let mut rx = self.router.take_receiver(key)?;
        let frame = rx.recv().await;
        self.router.put_receiver(key, rx);
        let frame = frame.ok_or(TransportError::ReceiveFailed {
            src,
            tag,
            reason: "sending endpoint is gone".into(),
        })?;
        trace!(%src, dest = %self.rank, %tag, bytes = frame.len(), "receive");
        self.unwrap_frame(frame, src, tag)
    }

    fn try_receive(&self, src: Rank, tag: Tag) -> Result<Option<Vec<u8>>, TransportError> {
        let key = (src, self.rank, tag.as_u32());
        let mut rx = self.router.take_receiver(key)?;
        let polled = rx.try_recv();
        self.router.put_receiver(key, rx);
        match polled {
            Ok(frame) => self.unwrap_frame(frame, src, tag).map(Some),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::ReceiveFailed {
                src,
                tag,
                reason: "sending endpoint is gone".into(),
            }),
        }
    }

    async fn broadcast(
        &self,
        root: Rank,
        tag: Tag,
        payload: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, TransportError> {
        if self.rank == root {
            let payload = payload.ok_or(TransportError::SendFailed {
                dest: root,
                tag,
                reason: "broadcast root requires a payload".into(),
            })?;
            for r in 0..self.router.world_size {
                let dest = Rank(r);
                if dest != root {
                    self.send(dest, tag, payload.clone()).await?;
                }
            }
            Ok(payload)
        } else {
            self.receive(root, tag).await
        }
    }

    async fn scatter(
        &self,
        root: Rank,
        tag: Tag,
        parts: Option<Vec<Vec<u8>>>,
    ) -> Result<Vec<u8>, TransportError> {
        if self.rank == root {
            let parts = parts.ok_or(TransportError::SendFailed {
                dest: root,
                tag,
                reason: "scatter root requires one payload per rank".into(),
            })?;
            if parts.len() != self.router.world_size as usize {
                return Err(TransportError::SendFailed {
                    dest: root,
                    tag,
                    reason: format!(
                        "scatter got {} payloads for {} ranks",
                        parts.len(),
                        self.router.world_size
                    ),
                });
            }
            let mut local = None;
            for (r, part) in parts.into_iter().enumerate() {
                let dest = Rank(r as u32);
                if dest == root {
                    local = Some(part);
                } else {
                    self.send(dest, tag, part).await?;
                }
            }
            Ok(local.expect("root index checked against world size"))
        } else {
            self.receive(root, tag).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_point_to_point() {
        let router = MemoryRouter::new(2);
        let a = router.endpoint(Rank(0));
        let b = router.endpoint(Rank(1));

        a.send(Rank(1), Tag::grid(6), vec![42]).await.unwrap();
        let got = b.receive(Rank(0), Tag::grid(6)).await.unwrap();
        assert_eq!(got, vec![42]);
    }

    #[tokio::test]
    async fn test_self_send() {
        let router = MemoryRouter::new(1);
        let a = router.endpoint(Rank(0));

        a.send(Rank(0), Tag::grid(4), vec![7]).await.unwrap();
        let got = a.receive(Rank(0), Tag::grid(4)).await.unwrap();
        assert_eq!(got, vec![7]);
    }

    #[tokio::test]
    async fn test_tags_are_independent_channels() {
        let router = MemoryRouter::new(2);
        let a = router.endpoint(Rank(0));
        let b = router.endpoint(Rank(1));

        a.send(Rank(1), Tag::grid(6), vec![6]).await.unwrap();
        a.send(Rank(1), Tag::grid(4), vec![4]).await.unwrap();

        // Receive in the opposite order of sending.
        assert_eq!(b.receive(Rank(0), Tag::grid(4)).await.unwrap(), vec![4]);
        assert_eq!(b.receive(Rank(0), Tag::grid(6)).await.unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn test_try_receive() {
        let router = MemoryRouter::new(2);
        let a = router.endpoint(Rank(0));
        let b = router.endpoint(Rank(1));

        assert_eq!(b.try_receive(Rank(0), Tag::cmd(1)).unwrap(), None);
        a.send(Rank(1), Tag::cmd(1), vec![1]).await.unwrap();
        assert_eq!(b.try_receive(Rank(0), Tag::cmd(1)).unwrap(), Some(vec![1]));
        assert_eq!(b.try_receive(Rank(0), Tag::cmd(1)).unwrap(), None);
    }

    #[tokio::test]
    async fn test_broadcast() {
        let router = MemoryRouter::new(3);
        let endpoints: Vec<_> = (0..3).map(|r| router.endpoint(Rank(r))).collect();

        let root = endpoints[0].clone();
        let bcast = tokio::spawn(async move {
            root.broadcast(Rank(0), Tag::setup(1), Some(vec![5, 5])).await
        });

        for endpoint in &endpoints[1..] {
            let got = endpoint.broadcast(Rank(0), Tag::setup(1), None).await.unwrap();
            assert_eq!(got, vec![5, 5]);
        }
        assert_eq!(bcast.await.unwrap().unwrap(), vec![5, 5]);
    }

    #[tokio::test]
    async fn test_scatter() {
        let router = MemoryRouter::new(3);
        let endpoints: Vec<_> = (0..3).map(|r| router.endpoint(Rank(r))).collect();

        let parts = vec![vec![0], vec![1], vec![2]];
        let root = endpoints[0].clone();
        let scat = tokio::spawn(async move {
            root.scatter(Rank(0), Tag::setup(2), Some(parts)).await
        });

        for (i, endpoint) in endpoints.iter().enumerate().skip(1) {
            let got = endpoint.scatter(Rank(0), Tag::setup(2), None).await.unwrap();
            assert_eq!(got, vec![i as u8]);
        }
        assert_eq!(scat.await.unwrap().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_scatter_wrong_part_count() {
        let router = MemoryRouter::new(2);
        let a = router.endpoint(Rank(0));
        let err = a
            .scatter(Rank(0), Tag::setup(2), Some(vec![vec![0]]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));
    }
}
