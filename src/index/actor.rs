//! Index Actor
//!
//! Wraps the meta and data index trees in tokio tasks speaking a message
//! protocol. Each tree is its own task with a FIFO mailbox, so `index`
//! calls serialize, `save` observes every `index` that completed before
//! it, and a shutdown lets the in-flight operation finish.
//!
//! The [`IndexHandle`] fans messages out to both siblings; lookups AND
//! their answers, tolerating one tree lagging the other (the shorter bit
//! length is the observable frontier).

use crate::bitmap::{Bitstream, DefaultBitstream};
use crate::event::Event;
use crate::expr::Expr;
use crate::index::{data::EventDataIndex, meta::EventMetaIndex, EventIndex, Hits};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

/// Messages understood by an index task.
#[derive(Debug)]
pub enum IndexMsg {
    /// Append one event.
    Index(Event),
    /// Hydrate whatever the AST references, then evaluate it.
    Lookup(Expr, oneshot::Sender<Option<Hits<DefaultBitstream>>>),
    /// Persist everything appended since the last checkpoint.
    Save(oneshot::Sender<bool>),
    /// Finish pending work and terminate.
    Shutdown(oneshot::Sender<()>),
}

const MAILBOX: usize = 256;

/// Handle to the meta/data index pair rooted at one directory.
#[derive(Clone)]
pub struct IndexHandle {
    meta: mpsc::Sender<IndexMsg>,
    data: mpsc::Sender<IndexMsg>,
}

/// Spawn the sibling index actors under `dir/meta` and `dir/data`.
pub fn spawn(dir: &Path) -> IndexHandle {
    let meta = spawn_tree(EventMetaIndex::<DefaultBitstream>::new(dir.join("meta")));
    let data = spawn_tree(EventDataIndex::<DefaultBitstream>::new(dir.join("data")));
    IndexHandle { meta, data }
}

fn spawn_tree<T: EventIndex>(index: T) -> mpsc::Sender<IndexMsg> {
    let (tx, rx) = mpsc::channel(MAILBOX);
    tokio::spawn(run(index, rx));
    tx
}

async fn run<T: EventIndex>(mut index: T, mut rx: mpsc::Receiver<IndexMsg>) {
    if let Err(e) = index.scan() {
        tracing::error!(error = %e, "{}: scan failed, quitting", index.description());
        return;
    }
    while let Some(msg) = rx.recv().await {
        match msg {
            IndexMsg::Index(event) => {
                if let Err(e) = index.index(&event) {
                    tracing::error!(
                        error = %e,
                        id = event.id,
                        "{}: indexing failed, quitting",
                        index.description()
                    );
                    return;
                }
            }
            IndexMsg::Lookup(ast, reply) => {
                if let Err(e) = index.load(&ast) {
                    tracing::error!(
                        error = %e,
                        "{}: load failed, quitting",
                        index.description()
                    );
                    let _ = reply.send(None);
                    return;
                }
                let _ = reply.send(index.lookup(&ast));
            }
            IndexMsg::Save(ack) => {
                match index.save() {
                    Ok(()) => {
                        let _ = ack.send(true);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "{}: save failed, quitting",
                            index.description()
                        );
                        let _ = ack.send(false);
                        return;
                    }
                }
            }
            IndexMsg::Shutdown(ack) => {
                // The final save still runs so checkpoints stay
                // monotonic.
                if let Err(e) = index.save() {
                    tracing::warn!(
                        error = %e,
                        "{}: save on shutdown failed",
                        index.description()
                    );
                }
                tracing::debug!("{} terminated", index.description());
                let _ = ack.send(());
                return;
            }
        }
    }
}

impl IndexHandle {
    /// Forward an event to both trees.
    pub async fn index(&self, event: Event) {
        let _ = self.meta.send(IndexMsg::Index(event.clone())).await;
        let _ = self.data.send(IndexMsg::Index(event)).await;
    }

    /// Evaluate an AST against both trees and AND the answers.
    ///
    /// `None` means neither tree could answer any part of the query and
    /// the caller must fall back to a full scan.
    pub async fn lookup(&self, ast: &Expr) -> Option<DefaultBitstream> {
        let meta = request(&self.meta, |reply| IndexMsg::Lookup(ast.clone(), reply)).await;
        let data = request(&self.data, |reply| IndexMsg::Lookup(ast.clone(), reply)).await;
        match (meta.flatten(), data.flatten()) {
            (Some(m), Some(d)) => Some(m.bits.and(&d.bits)),
            (Some(m), None) => Some(m.bits),
            (None, Some(d)) => Some(d.bits),
            (None, None) => None,
        }
    }

    /// Persist both trees. Returns false if either failed.
    pub async fn save(&self) -> bool {
        let meta = request(&self.meta, IndexMsg::Save).await;
        let data = request(&self.data, IndexMsg::Save).await;
        meta.unwrap_or(false) && data.unwrap_or(false)
    }

    /// Terminate both trees, completing in-flight saves first.
    pub async fn shutdown(&self) {
        let _ = request(&self.meta, IndexMsg::Shutdown).await;
        let _ = request(&self.data, IndexMsg::Shutdown).await;
    }
}

/// Send a request carrying a oneshot reply channel and await the answer.
async fn request<R>(
    tx: &mpsc::Sender<IndexMsg>,
    make: impl FnOnce(oneshot::Sender<R>) -> IndexMsg,
) -> Option<R> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(make(reply_tx)).await.ok()?;
    reply_rx.await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;
    use crate::value::Value;
    use tempfile::tempdir;

    fn event(id: u64, name: &str, n: u64) -> Event {
        Event::new(
            id,
            name,
            id as i64 * 1_000_000_000,
            vec![Value::Count(n), Value::String(name.to_string())],
        )
    }

    #[tokio::test]
    async fn test_index_and_lookup_through_actor() {
        let dir = tempdir().unwrap();
        let handle = spawn(dir.path());

        handle.index(event(1, "bro::conn", 42)).await;
        handle.index(event(2, "bro::http", 7)).await;
        handle.index(event(3, "bro::conn", 42)).await;

        let ast = expr::parse(":count == 42").unwrap();
        let bits = handle.lookup(&ast).await.unwrap();
        assert_eq!(bits.ones(), vec![1, 3]);

        // A conjunction spanning both trees intersects their answers.
        let ast = expr::parse("&name == \"bro::conn\" && :count == 42").unwrap();
        let bits = handle.lookup(&ast).await.unwrap();
        assert_eq!(bits.ones(), vec![1, 3]);

        let ast = expr::parse("&name == \"bro::http\" && :count == 42").unwrap();
        let bits = handle.lookup(&ast).await.unwrap();
        assert!(bits.ones().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_then_fresh_actor_answers() {
        let dir = tempdir().unwrap();
        {
            let handle = spawn(dir.path());
            handle.index(event(1, "bro::conn", 42)).await;
            handle.index(event(2, "bro::http", 7)).await;
            assert!(handle.save().await);
            handle.shutdown().await;
        }

        let handle = spawn(dir.path());
        let ast = expr::parse("&name == \"bro::http\"").unwrap();
        let bits = handle.lookup(&ast).await.unwrap();
        assert_eq!(bits.ones(), vec![2]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unanswerable_query_is_none() {
        let dir = tempdir().unwrap();
        let handle = spawn(dir.path());
        handle.index(event(1, "bro::conn", 42)).await;

        // Match operators never hit the bitmap layer.
        let ast = expr::parse("@1 ~ \"conn\"").unwrap();
        assert!(handle.lookup(&ast).await.is_none());
        handle.shutdown().await;
    }
}
