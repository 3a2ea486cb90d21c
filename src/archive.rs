//! Archive & Sink Protocols
//!
//! The two collaborators a query talks to besides the indexes:
//!
//! - the **archive** materializes events by id: `Get(ids)` answers with a
//!   source cursor that hands out chunks on demand, each reader holding
//!   its own position;
//! - the **sink** receives a creation notice, matched events one by one,
//!   and a final `(uuid, done, runtime)` triple.
//!
//! [`MemoryArchive`] is the in-process archive implementation: an
//! append-only event store. The on-disk write-ahead archive lives
//! outside this crate; it speaks the same protocol.

use crate::bitmap::{Bitstream, DefaultBitstream};
use crate::event::Event;
use crate::query::ExporterMsg;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Messages a sink receives over the lifetime of one query.
#[derive(Debug, Clone)]
pub enum SinkMsg {
    /// The query bound its source and will start delivering.
    Created(Uuid),
    /// One matched event.
    Event(Event),
    /// The query finished; no further messages follow.
    Done { id: Uuid, runtime: Duration },
    /// The query failed; an empty result, not an exception.
    Error { id: Uuid, message: String },
}

/// Messages a source cursor understands.
#[derive(Debug)]
pub enum SourceMsg {
    /// Deliver the next chunk to the owning query.
    Emit,
}

/// Messages the archive actor understands.
#[derive(Debug)]
pub enum ArchiveMsg {
    /// Append a batch of events.
    Store(Vec<Event>),
    /// Create a source over the events whose ids are set in `ids`
    /// (`None` selects everything), replying with `Source(...)`.
    Get {
        ids: Option<DefaultBitstream>,
        reply: mpsc::Sender<ExporterMsg>,
    },
}

const MAILBOX: usize = 64;

/// Handle to an archive actor.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<ArchiveMsg>,
}

impl ArchiveHandle {
    pub async fn store(&self, events: Vec<Event>) {
        let _ = self.tx.send(ArchiveMsg::Store(events)).await;
    }

    pub(crate) async fn get(
        &self,
        ids: Option<DefaultBitstream>,
        reply: mpsc::Sender<ExporterMsg>,
    ) -> bool {
        self.tx.send(ArchiveMsg::Get { ids, reply }).await.is_ok()
    }
}

/// In-memory append-only archive.
pub struct MemoryArchive;

impl MemoryArchive {
    /// Spawn the archive actor. `chunk_size` bounds the events per chunk
    /// a source hands out.
    pub fn spawn(chunk_size: usize) -> ArchiveHandle {
        let (tx, rx) = mpsc::channel(MAILBOX);
        tokio::spawn(run(rx, chunk_size.max(1)));
        ArchiveHandle { tx }
    }
}

async fn run(mut rx: mpsc::Receiver<ArchiveMsg>, chunk_size: usize) {
    let mut events: Vec<Event> = Vec::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            ArchiveMsg::Store(batch) => {
                events.extend(batch);
            }
            ArchiveMsg::Get { ids, reply } => {
                let selected: Arc<Vec<Event>> = Arc::new(match &ids {
                    Some(bits) => events
                        .iter()
                        .filter(|e| bits.get(e.id))
                        .cloned()
                        .collect(),
                    None => events.clone(),
                });
                let source = spawn_source(selected, chunk_size, reply.clone());
                let _ = reply.send(ExporterMsg::Source(source)).await;
            }
        }
    }
}

/// A cursor over one selection, delivering chunks on demand. Each reader
/// holds its own position.
fn spawn_source(
    events: Arc<Vec<Event>>,
    chunk_size: usize,
    exporter: mpsc::Sender<ExporterMsg>,
) -> mpsc::Sender<SourceMsg> {
    let (tx, mut rx) = mpsc::channel::<SourceMsg>(MAILBOX);
    tokio::spawn(async move {
        let mut pos = 0usize;
        while let Some(SourceMsg::Emit) = rx.recv().await {
            let end = (pos + chunk_size).min(events.len());
            let chunk: Vec<Event> = events[pos..end].to_vec();
            pos = end;
            let exhausted = chunk.is_empty();
            if exporter.send(ExporterMsg::Chunk(chunk)).await.is_err() {
                return;
            }
            if exhausted {
                return;
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn event(id: u64) -> Event {
        Event::new(id, "t", 0, vec![Value::Count(id)])
    }

    #[tokio::test]
    async fn test_chunked_delivery() {
        let archive = MemoryArchive::spawn(2);
        archive.store((1..=5).map(event).collect()).await;

        let (tx, mut rx) = mpsc::channel(16);
        assert!(archive.get(None, tx).await);
        let ExporterMsg::Source(source) = rx.recv().await.unwrap() else {
            panic!("expected source");
        };

        let mut seen = Vec::new();
        loop {
            source.send(SourceMsg::Emit).await.unwrap();
            let ExporterMsg::Chunk(chunk) = rx.recv().await.unwrap() else {
                panic!("expected chunk");
            };
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 2);
            seen.extend(chunk.into_iter().map(|e| e.id));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_id_selection() {
        let archive = MemoryArchive::spawn(10);
        archive.store((1..=5).map(event).collect()).await;

        let mut ids = DefaultBitstream::new();
        ids.append(2, false);
        ids.push(true); // id 2
        ids.push(false);
        ids.push(true); // id 4

        let (tx, mut rx) = mpsc::channel(16);
        assert!(archive.get(Some(ids), tx).await);
        let ExporterMsg::Source(source) = rx.recv().await.unwrap() else {
            panic!("expected source");
        };
        source.send(SourceMsg::Emit).await.unwrap();
        let ExporterMsg::Chunk(chunk) = rx.recv().await.unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 4]);
    }
}
