//! Scripted in-memory port for protocol tests.
//!
//! Every `write` call is recorded. After each write the mock asks its
//! responder (or pops the next scripted reply) and appends the answer to the
//! receive buffer, so a reply becomes visible exactly when a real target
//! would start answering.

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

pub(crate) struct MockPort {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) input_clears: usize,
    pub(crate) output_clears: usize,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            replies: VecDeque::new(),
            responder: None,
            writes: Vec::new(),
            input_clears: 0,
            output_clears: 0,
            closed: false,
        }
    }

    /// Queue replies, one per upcoming write. An empty reply means silence.
    pub(crate) fn with_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut port = Self::new();
        port.replies = replies.into_iter().collect();
        port
    }

    /// Answer every write through `f`.
    pub(crate) fn with_responder<F>(f: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let mut port = Self::new();
        port.responder = Some(Box::new(f));
        port
    }

    /// Make bytes readable immediately, as if they arrived unsolicited.
    pub(crate) fn push_rx(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Port for MockPort {
    fn baud_rate(&self) -> u32 {
        crate::port::BOOTROM_BAUD
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.input_clears += 1;
        self.rx.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        self.output_clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.rx.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writes.push(buf.to_vec());
        let reply = match self.responder.as_mut() {
            Some(respond) => respond(buf),
            None => self.replies.pop_front(),
        };
        if let Some(reply) = reply {
            self.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
