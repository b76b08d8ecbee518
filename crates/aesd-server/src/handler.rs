use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_LINE_LEN;
use crate::error::{ServerError, ServerResult};
use crate::protocol::{take_complete_lines, Request};
use crate::registry::ConnectionId;
use crate::serializer::AccessSerializer;

/// How a connection ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Records were committed and the log was streamed back.
    Replied { committed: usize, sent: u64 },
    /// The peer closed before completing a line that commits a record.
    PeerClosed,
}

/// Per-connection state machine: read until a newline, commit the complete
/// lines, stream the log back, close.
///
/// Seek control lines only move this connection's read cursor; the handler
/// keeps reading after them. The reply starts at the read cursor, which is
/// 0 unless a seek moved it.
pub struct ConnectionHandler {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    serializer: Arc<AccessSerializer>,
    chunk_size: usize,
    max_line_len: usize,
    accumulator: Vec<u8>,
    read_cursor: u64,
}

impl ConnectionHandler {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        serializer: Arc<AccessSerializer>,
        chunk_size: usize,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            serializer,
            chunk_size: chunk_size.max(1),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            accumulator: Vec::new(),
            read_cursor: 0,
        }
    }

    /// Fail the connection once more than `max_line_len` bytes are buffered
    /// without a newline.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(1);
        self
    }

    /// Drive the connection to completion. Errors are logged here and go no
    /// further; the socket is closed on every path.
    pub fn run(mut self) -> Option<Outcome> {
        info!(id = self.id, peer = %self.peer, "accepted connection");
        let result = self.serve();
        match &result {
            Ok(outcome) => debug!(id = self.id, ?outcome, "connection finished"),
            Err(ServerError::ShuttingDown) => {
                debug!(id = self.id, "connection aborted by shutdown")
            }
            Err(e) => warn!(id = self.id, peer = %self.peer, error = %e, "connection failed"),
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        info!(id = self.id, peer = %self.peer, "closed connection");
        result.ok()
    }

    fn serve(&mut self) -> ServerResult<Outcome> {
        let mut scratch = vec![0u8; self.chunk_size];
        loop {
            let received = match self.stream.read(&mut scratch) {
                Ok(0) => {
                    if !self.accumulator.is_empty() {
                        debug!(
                            id = self.id,
                            dropped = self.accumulator.len(),
                            "unterminated data discarded"
                        );
                    }
                    return Ok(Outcome::PeerClosed);
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Transport(e)),
            };
            self.accumulator.extend_from_slice(&scratch[..received]);

            let Some(batch) = take_complete_lines(&mut self.accumulator) else {
                if self.accumulator.len() > self.max_line_len {
                    return Err(ServerError::LineTooLong {
                        limit: self.max_line_len,
                    });
                }
                continue;
            };
            let committed = self.commit(&batch)?;
            if committed == 0 {
                continue;
            }

            if !self.accumulator.is_empty() {
                debug!(
                    id = self.id,
                    dropped = self.accumulator.len(),
                    "trailing partial line discarded"
                );
                self.accumulator.clear();
            }
            let sent = self.reply()?;
            return Ok(Outcome::Replied { committed, sent });
        }
    }

    /// Apply every line of `batch` in order under one lock acquisition.
    /// Returns how many records were committed.
    fn commit(&mut self, batch: &[u8]) -> ServerResult<usize> {
        let mut store = self.serializer.acquire()?;
        let mut committed = 0;
        for line in batch.split_inclusive(|b| *b == b'\n') {
            match Request::parse(line) {
                Ok(Request::Seek(request)) => match store.translate(request) {
                    Ok(offset) => {
                        debug!(
                            id = self.id,
                            index = request.index,
                            offset = request.offset,
                            absolute = offset,
                            "seek"
                        );
                        self.read_cursor = offset;
                    }
                    Err(e) => warn!(id = self.id, error = %e, "seek rejected"),
                },
                Ok(Request::Append(record)) => {
                    store.append(record)?;
                    committed += 1;
                }
                Err(e) => warn!(id = self.id, error = %e, "control line rejected"),
            }
        }
        Ok(committed)
    }

    /// Stream the log from the read cursor to its end, one chunk per lock
    /// acquisition. The lock is released before each send.
    fn reply(&mut self) -> ServerResult<u64> {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut offset = self.read_cursor;
        loop {
            let n = self.serializer.acquire()?.read_at(offset, &mut chunk)?;
            if n == 0 {
                break;
            }
            self.stream
                .write_all(&chunk[..n])
                .map_err(ServerError::Transport)?;
            offset += n as u64;
        }
        let sent = offset - self.read_cursor;
        debug!(id = self.id, sent, "log streamed");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownSignal;
    use aesd_store::LogDevice;
    use std::net::TcpListener;
    use std::thread;

    fn serializer(capacity: usize) -> Arc<AccessSerializer> {
        Arc::new(AccessSerializer::new(
            Box::new(LogDevice::new(capacity).unwrap()),
            Arc::new(ShutdownSignal::new()),
        ))
    }

    /// Run one handler against a scripted client and return what the client
    /// received plus the handler's outcome.
    fn exchange(
        serializer: &Arc<AccessSerializer>,
        chunk_size: usize,
        script: impl FnOnce(&mut TcpStream) + Send + 'static,
    ) -> (Vec<u8>, Option<Outcome>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            script(&mut stream);
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).unwrap();
            reply
        });
        let (stream, peer) = listener.accept().unwrap();
        let outcome =
            ConnectionHandler::new(0, peer, stream, Arc::clone(serializer), chunk_size).run();
        (client.join().unwrap(), outcome)
    }

    #[test]
    fn commit_and_echo_full_log() {
        let s = serializer(10);
        s.append(b"first\n").unwrap();
        let (reply, outcome) = exchange(&s, 4, |c| c.write_all(b"second\n").unwrap());
        assert_eq!(reply, b"first\nsecond\n");
        assert_eq!(outcome, Some(Outcome::Replied { committed: 1, sent: 13 }));
    }

    #[test]
    fn line_split_across_packets() {
        let s = serializer(10);
        let (reply, _) = exchange(&s, 1024, |c| {
            c.write_all(b"hel").unwrap();
            c.flush().unwrap();
            thread::sleep(std::time::Duration::from_millis(20));
            c.write_all(b"lo\n").unwrap();
        });
        assert_eq!(reply, b"hello\n");
    }

    #[test]
    fn overlong_line_fails_only_its_connection() {
        let s = serializer(10);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let _ = stream.write_all(&[b'z'; 64]);
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
            rest
        });
        let (stream, peer) = listener.accept().unwrap();
        let outcome = ConnectionHandler::new(0, peer, stream, Arc::clone(&s), 8)
            .with_max_line_len(16)
            .run();
        assert_eq!(outcome, None);
        assert!(client.join().unwrap().is_empty());
        assert!(s.contents(16).unwrap().is_empty());

        let (reply, _) = exchange(&s, 8, |c| c.write_all(b"ok\n").unwrap());
        assert_eq!(reply, b"ok\n");
    }

    #[test]
    fn peer_close_without_newline_is_noop() {
        let s = serializer(10);
        let (reply, outcome) = exchange(&s, 1024, |c| {
            c.write_all(b"no terminator").unwrap();
            c.shutdown(Shutdown::Write).unwrap();
        });
        assert!(reply.is_empty());
        assert_eq!(outcome, Some(Outcome::PeerClosed));
        assert!(s.contents(16).unwrap().is_empty());
    }

    #[test]
    fn seek_moves_reply_start() {
        let s = serializer(10);
        s.append(b"hello\n").unwrap();
        s.append(b"world\n").unwrap();
        let (reply, _) = exchange(&s, 1024, |c| {
            c.write_all(b"AESDCHAR_IOCSEEKTO:1,2\n").unwrap();
            c.flush().unwrap();
            thread::sleep(std::time::Duration::from_millis(20));
            c.write_all(b"x\n").unwrap();
        });
        assert_eq!(reply, b"rld\nx\n");
        assert_eq!(s.contents(16).unwrap(), b"hello\nworld\nx\n");
    }

    #[test]
    fn rejected_seek_is_not_stored() {
        let s = serializer(10);
        s.append(b"abc\n").unwrap();
        let (reply, _) = exchange(&s, 1024, |c| {
            c.write_all(b"AESDCHAR_IOCSEEKTO:5,0\nnext\n").unwrap();
        });
        assert_eq!(reply, b"abc\nnext\n");
    }

    #[test]
    fn several_lines_in_one_packet() {
        let s = serializer(3);
        let (reply, outcome) = exchange(&s, 1024, |c| c.write_all(b"aa\nbb\ncc\ndd\n").unwrap());
        assert_eq!(reply, b"bb\ncc\ndd\n");
        assert_eq!(outcome, Some(Outcome::Replied { committed: 4, sent: 9 }));
    }

    #[test]
    fn shutdown_aborts_commit() {
        let s = serializer(3);
        s.shutdown_signal().trigger();
        let (reply, outcome) = exchange(&s, 1024, |c| c.write_all(b"late\n").unwrap());
        assert!(reply.is_empty());
        assert!(outcome.is_none());
    }
}
