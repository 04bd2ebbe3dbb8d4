use crate::config::ReaderConfig;
use crate::error::Error;
use crate::event::EventDefinition;
use crate::packet::{EventSource, PacketDescriptor};
use crate::types::Interruptor;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Message on the pipeline queue. `Done` is the sentinel: it marks producer
/// termination and carries any decode error for deferred delivery.
enum Chunk {
    Events(Vec<EventDefinition>),
    Done(Option<Error>),
}

/// Advisory snapshot of one pipeline queue, for monitoring only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDepth {
    pub name: String,
    pub depth: usize,
    pub capacity: usize,
}

/// Wraps an [`EventSource`] with a producer thread that decodes ahead of the
/// consumer into fixed-size chunks on a bounded queue.
///
/// Exactly one producer feeds exactly one consumer; the queue is the only
/// suspension point. Events arrive in decode order, and a producer decode
/// error is delivered only after every event decoded before it has been
/// consumed.
pub struct ThreadedPacketReader {
    rx: Receiver<Chunk>,
    current: std::vec::IntoIter<EventDefinition>,
    /// First event, decoded synchronously at construction so the first read
    /// never waits on thread startup
    pending: Option<EventDefinition>,
    deferred_error: Option<Error>,
    exhausted: bool,
    interruptor: Interruptor,
    handle: Option<JoinHandle<()>>,
    descriptor: Option<PacketDescriptor>,
    queue_name: String,
    queue_capacity: usize,
}

impl ThreadedPacketReader {
    pub fn spawn<S>(mut source: S, config: ReaderConfig) -> Self
    where
        S: EventSource + Send + 'static,
    {
        let chunk_size = usize::from(config.chunk_size).max(1);
        let queue_capacity = usize::from(config.queue_capacity).max(1);
        let queue_name = config
            .queue_name
            .unwrap_or_else(|| "packet-reader".to_string());
        let descriptor = source.descriptor().cloned();
        let interruptor = Interruptor::new();

        // Eager pre-read; a failure here is deferred like any other
        // producer error (it simply has zero events ahead of it)
        let (pending, pre_read_error) = match source.next_event() {
            Ok(event) => (event, None),
            Err(e) => (None, Some(e)),
        };

        let (tx, rx) = bounded(queue_capacity);
        let mut reader = ThreadedPacketReader {
            rx,
            current: Vec::new().into_iter(),
            pending,
            deferred_error: pre_read_error,
            exhausted: false,
            interruptor: interruptor.clone(),
            handle: None,
            descriptor,
            queue_name,
            queue_capacity,
        };

        if reader.pending.is_some() {
            reader.handle = Some(std::thread::spawn(move || {
                produce(source, tx, chunk_size, interruptor)
            }));
        } else {
            // Nothing to decode ahead of; the sentinel state is already known
            reader.exhausted = true;
        }
        reader
    }

    /// True while an event or a deferred producer error remains to be
    /// delivered. Blocks on the queue when the current chunk is exhausted.
    pub fn has_more_events(&mut self) -> bool {
        if self.pending.is_some()
            || !self.current.as_slice().is_empty()
            || self.deferred_error.is_some()
        {
            return true;
        }
        if self.exhausted {
            return false;
        }
        loop {
            match self.rx.recv() {
                Ok(Chunk::Events(events)) => {
                    if !events.is_empty() {
                        self.current = events.into_iter();
                        return true;
                    }
                }
                Ok(Chunk::Done(error)) => {
                    self.exhausted = true;
                    self.deferred_error = error;
                    return self.deferred_error.is_some();
                }
                Err(_) => {
                    // Producer gone without its sentinel; only happens if it
                    // was interrupted or panicked mid-decode
                    self.exhausted = true;
                    self.deferred_error = Some(Error::Closed);
                    return true;
                }
            }
        }
    }

    /// Next event in decode order, or the deferred producer error once all
    /// events decoded before the failure have been drained.
    pub fn read_next_event(&mut self) -> Result<Option<EventDefinition>, Error> {
        if !self.has_more_events() {
            return Ok(None);
        }
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }
        if let Some(event) = self.current.next() {
            return Ok(Some(event));
        }
        match self.deferred_error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    /// Descriptor of the packet feeding this reader, when the source has one.
    pub fn current_packet(&self) -> Option<&PacketDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn cpu(&self) -> u32 {
        self.descriptor.as_ref().map(|d| d.cpu).unwrap_or(0)
    }

    /// Advisory queue depth snapshot; never required for correct decoding.
    pub fn queue_depths(&self) -> Vec<QueueDepth> {
        vec![QueueDepth {
            name: self.queue_name.clone(),
            depth: self.rx.len(),
            capacity: self.queue_capacity,
        }]
    }

    /// Interrupt the producer and wait for it to exit. Undelivered events
    /// and any partially built chunk are discarded.
    pub fn close(&mut self) {
        self.interruptor.set();
        self.exhausted = true;
        self.pending = None;
        self.current = Vec::new().into_iter();
        self.deferred_error = None;
        // Unblock a producer waiting on the full queue so it can observe
        // the interrupt
        while self.rx.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Packet reader producer thread panicked");
            }
        }
    }
}

impl Drop for ThreadedPacketReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer loop: decode to exhaustion, batching events into chunks. The
/// bounded queue provides the only backpressure; when it is full the send
/// blocks and no event is dropped.
fn produce<S: EventSource>(
    mut source: S,
    tx: Sender<Chunk>,
    chunk_size: usize,
    interruptor: Interruptor,
) {
    let mut chunk: Vec<EventDefinition> = Vec::with_capacity(chunk_size);
    loop {
        if interruptor.is_set() {
            if !chunk.is_empty() {
                debug!(
                    discarded = chunk.len(),
                    "Discarding partially built chunk on close"
                );
            }
            return;
        }
        match source.next_event() {
            Ok(Some(event)) => {
                chunk.push(event);
                if chunk.len() == chunk_size {
                    let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                    if tx.send(Chunk::Events(full)).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(Chunk::Events(chunk));
                let _ = tx.send(Chunk::Done(None));
                return;
            }
            Err(error) => {
                warn!(%error, "Producer decode failed, deferring the error behind decoded events");
                let _ = tx.send(Chunk::Events(chunk));
                let _ = tx.send(Chunk::Done(Some(error)));
                return;
            }
        }
    }
}
