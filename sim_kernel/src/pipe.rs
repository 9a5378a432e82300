//! In-kernel pipes

use ipc::CloseSignal;
use kernel_api::{KernelError, KernelResult};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

struct ReadState {
    queue: mpsc::Receiver<Vec<u8>>,
    partial: Vec<u8>,
    offset: usize,
}

/// One bounded queue shared by a reader handle and a writer handle
///
/// Writers wait when the queue is full. Closing the writer lets the reader
/// drain what is queued and then see end of file; closing the reader makes
/// further writes fail.
pub(crate) struct Pipe {
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    reader: tokio::sync::Mutex<ReadState>,
    reader_closed: CloseSignal,
}

impl Pipe {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            reader: tokio::sync::Mutex::new(ReadState {
                queue: rx,
                partial: Vec::new(),
                offset: 0,
            }),
            reader_closed: CloseSignal::new(),
        }
    }

    pub(crate) async fn write(&self, data: &[u8]) -> KernelResult<usize> {
        if self.reader_closed.is_closed() {
            return Err(KernelError::Closed);
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(KernelError::Closed)?;
        if data.is_empty() {
            return Ok(0);
        }

        tokio::select! {
            sent = sender.send(data.to_vec()) => {
                sent.map(|()| data.len()).map_err(|_| KernelError::Closed)
            }
            _ = self.reader_closed.closed() => Err(KernelError::Closed),
        }
    }

    /// Reads queued bytes; `Ok(0)` once the writer is closed and drained
    pub(crate) async fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Err(KernelError::invalid("empty read buffer"));
        }
        if self.reader_closed.is_closed() {
            return Err(KernelError::Closed);
        }

        let mut state = self.reader.lock().await;
        if state.offset >= state.partial.len() {
            let next = tokio::select! {
                next = state.queue.recv() => next,
                _ = self.reader_closed.closed() => return Err(KernelError::Closed),
            };
            match next {
                Some(chunk) => {
                    state.partial = chunk;
                    state.offset = 0;
                }
                None => return Ok(0),
            }
        }

        let remaining = &state.partial[state.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        state.offset += n;
        Ok(n)
    }

    pub(crate) fn close_writer(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn close_reader(&self) {
        self.reader_closed.close();
    }
}
