//! Read lanes.
//!
//! One long-lived thread per backing store serves read requests in arrival
//! order: open the source if needed, take a buffer from the pool, fill it,
//! reply. A compressor keeps at most one request in flight, so a lane's
//! queue never holds more than one request per active file.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use super::entry_input::{EntrySource, StoreId};
use crate::pool::{BufferPool, Demand, PooledBuffer};
use crate::{Error, Result};

/// A source in either of its two states.
pub(crate) enum Stream {
    Unopened(Box<dyn EntrySource>),
    Open(Box<dyn Read + Send>),
}

pub(crate) struct ReadRequest {
    pub stream: Stream,
    pub reply: Sender<ReadOutcome>,
}

/// Reply to a [`ReadRequest`].
///
/// `chunk` is `Ok(None)` at end of input. The stream comes back so the next
/// request can continue where this one stopped.
pub(crate) struct ReadOutcome {
    pub stream: Option<Box<dyn Read + Send>>,
    pub chunk: Result<Option<PooledBuffer>>,
}

/// The set of lanes of one writer, spawned on first use.
pub(crate) struct Lanes {
    pool: Arc<BufferPool>,
    cancel: Arc<AtomicBool>,
    lanes: HashMap<StoreId, (Sender<ReadRequest>, JoinHandle<()>)>,
}

impl Lanes {
    pub(crate) fn new(pool: Arc<BufferPool>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            pool,
            cancel,
            lanes: HashMap::new(),
        }
    }

    /// Request channel of the lane serving `store`.
    pub(crate) fn sender(&mut self, store: StoreId) -> Result<Sender<ReadRequest>> {
        if let Some((sender, _)) = self.lanes.get(&store) {
            return Ok(sender.clone());
        }
        let (sender, receiver) = crossbeam_channel::unbounded();
        let pool = Arc::clone(&self.pool);
        let cancel = Arc::clone(&self.cancel);
        let name = match store {
            StoreId::Memory => "zipkit-read-mem".to_owned(),
            StoreId::Device(dev) => format!("zipkit-read-{dev}"),
        };
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_lane(receiver, &pool, &cancel))?;
        log::trace!("spawned read lane for {store:?}");
        self.lanes.insert(store, (sender.clone(), handle));
        Ok(sender)
    }

    /// Number of lanes spawned so far.
    pub(crate) fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Drops the writer's senders and waits for every lane to drain.
    ///
    /// Lanes exit once the last compressor holding a sender is done.
    pub(crate) fn join(self) {
        let handles: Vec<_> = self
            .lanes
            .into_values()
            .map(|(sender, handle)| {
                drop(sender);
                handle
            })
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("read lane panicked");
            }
        }
    }
}

fn run_lane(requests: Receiver<ReadRequest>, pool: &Arc<BufferPool>, cancel: &AtomicBool) {
    for request in requests {
        let outcome = serve(request.stream, pool, cancel);
        // The compressor may have failed meanwhile; its buffer returns on drop
        let _ = request.reply.send(outcome);
    }
}

fn serve(stream: Stream, pool: &Arc<BufferPool>, cancel: &AtomicBool) -> ReadOutcome {
    let failed = |error: Error| ReadOutcome {
        stream: None,
        chunk: Err(error),
    };
    if cancel.load(Ordering::Relaxed) {
        return failed(Error::Cancelled);
    }
    let mut stream = match stream {
        Stream::Open(stream) => stream,
        Stream::Unopened(source) => match source.open() {
            Ok(stream) => stream,
            Err(e) => return failed(Error::Io(e)),
        },
    };
    let mut buffer = match pool.acquire(Demand::Reader) {
        Ok(buffer) => buffer,
        Err(e) => return failed(e),
    };
    match buffer.fill_from(&mut stream) {
        Ok(0) => ReadOutcome {
            stream: None,
            chunk: Ok(None),
        },
        Ok(_) => ReadOutcome {
            stream: Some(stream),
            chunk: Ok(Some(buffer)),
        },
        Err(e) => failed(Error::Io(e)),
    }
}
