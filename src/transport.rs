//! Framed, time-bounded socket I/O with one agent.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, instrument, trace, warn};

use crate::error::TransportFault;
use crate::protocol::frame::{decode_body, decode_header, encode_frame, HEADER_LEN};
use crate::protocol::{parse_agent_command, AgentCommand};

/// One agent's socket.
///
/// Every fault closes the socket before it is returned, later calls fail with
/// [`TransportFault::Disconnected`].
#[derive(Debug)]
pub struct AgentConnection {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    send_timeout: Duration,
}

impl AgentConnection {
    /// Once a frame has started, the rest of it must arrive within this bound.
    const FRAME_COMPLETION_TIMEOUT: Duration = Duration::from_secs(1);
    const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
    const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

    fn from_stream(stream: TcpStream, send_timeout: Duration) -> io::Result<AgentConnection> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(send_timeout.max(Self::MIN_READ_TIMEOUT)))?;
        let peer = stream.peer_addr().ok();
        Ok(AgentConnection {
            stream: Some(stream),
            peer,
            send_timeout,
        })
    }

    /// Waits up to `timeout` for one inbound connection and reads its CONNECT.
    ///
    /// Returns `Ok(None)` when nobody connected in time or when the first frame was not a
    /// CONNECT. Errors only come from the listener itself.
    #[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn accept(
        listener: &TcpListener,
        timeout: Duration,
        send_timeout: Duration,
    ) -> anyhow::Result<Option<(AgentConnection, String)>> {
        listener
            .set_nonblocking(true)
            .context("kernel error: setting non-blocking on listener")?;

        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    trace!(%addr, "inbound connection");
                    let mut connection = match Self::from_stream(stream, send_timeout) {
                        Ok(connection) => connection,
                        Err(e) => {
                            warn!(%addr, %e, "could not configure agent socket");
                            return Ok(None);
                        }
                    };
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    return Ok(match connection.receive(remaining) {
                        Ok(Some(payload)) => match parse_agent_command(&payload) {
                            AgentCommand::Connect { group } => Some((connection, group)),
                            other => {
                                warn!(%addr, command = %other, "first command was not CONNECT");
                                connection.disconnect();
                                None
                            }
                        },
                        Ok(None) => {
                            debug!(%addr, "no CONNECT before the deadline");
                            connection.disconnect();
                            None
                        }
                        Err(e) => {
                            warn!(%addr, %e, "handshake failed");
                            None
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("kernel error: accepting connection"),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(
                Self::ACCEPT_POLL_INTERVAL
                    .min(timeout / 10)
                    .max(Duration::from_millis(1)),
            );
        }
    }

    /// Connects to a kernel, agent side.
    pub fn connect(
        addr: impl ToSocketAddrs,
        send_timeout: Duration,
    ) -> io::Result<AgentConnection> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, send_timeout)
    }

    /// True until the first fault or [`disconnect`](Self::disconnect).
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Bound applied to every send.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Sends one frame. The whole frame must be written within the send bound, however slowly
    /// the peer drains it.
    pub fn send(&mut self, payload: &str) -> Result<(), TransportFault> {
        let stream = self.stream.as_mut().ok_or(TransportFault::Disconnected)?;
        let frame = encode_frame(payload);
        if let Err(fault) = write_before(stream, &frame, Instant::now() + self.send_timeout) {
            self.disconnect();
            return Err(fault);
        }
        trace!(payload, "sent");
        Ok(())
    }

    /// Waits up to `timeout` for one frame.
    ///
    /// Returns `Ok(None)` if no frame started before the timeout.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<String>, TransportFault> {
        let result = self.receive_frame(timeout);
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    fn receive_frame(&mut self, timeout: Duration) -> Result<Option<String>, TransportFault> {
        let stream = self.stream.as_mut().ok_or(TransportFault::Disconnected)?;
        stream.set_read_timeout(Some(timeout.max(Self::MIN_READ_TIMEOUT)))?;

        let mut header = [0u8; HEADER_LEN];
        let first = loop {
            match stream.read(&mut header) {
                Ok(0) => return Err(TransportFault::ClosedByPeer),
                Ok(n) => break n,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        stream.set_read_timeout(Some(Self::FRAME_COMPLETION_TIMEOUT))?;
        read_rest(stream, &mut header[first..])?;
        let len = decode_header(header)?;
        let mut body = vec![0u8; len];
        read_rest(stream, &mut body)?;
        let payload = decode_body(&body)?;
        trace!(%payload, "received");
        Ok(Some(payload))
    }

    /// Closes the socket. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = ?self.peer, "disconnected");
        }
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// `write_all` bounded by one deadline for the whole buffer.
fn write_before(
    stream: &mut TcpStream,
    mut buf: &[u8],
    deadline: Instant,
) -> Result<(), TransportFault> {
    while !buf.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportFault::SendTimeout);
        }
        stream.set_write_timeout(Some(remaining.max(AgentConnection::MIN_READ_TIMEOUT)))?;
        match stream.write(buf) {
            Ok(0) => return Err(TransportFault::ClosedByPeer),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// `read_exact` where a timeout or EOF in the middle of a frame is a truncation.
fn read_rest(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), TransportFault> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(TransportFault::Truncated)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    const SEND_TIMEOUT: Duration = Duration::from_millis(100);

    fn pair() -> (AgentConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            AgentConnection::from_stream(server, SEND_TIMEOUT).unwrap(),
            client,
        )
    }

    #[test]
    fn receive_times_out_without_fault() {
        let (mut conn, _client) = pair();
        assert_eq!(conn.receive(Duration::from_millis(20)), Ok(None));
        assert!(conn.is_connected());
        // zero timeout must not mean "block forever"
        assert_eq!(conn.receive(Duration::ZERO), Ok(None));
    }

    #[test]
    fn frames_in_both_directions() {
        let (mut conn, mut client) = pair();
        client.write_all(&encode_frame("END_TURN")).unwrap();
        assert_eq!(
            conn.receive(Duration::from_secs(1)),
            Ok(Some("END_TURN".to_owned()))
        );

        conn.send("ROUND_START").unwrap();
        let mut buf = vec![0u8; 4 + "ROUND_START".len() + 1];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, encode_frame("ROUND_START"));
    }

    #[test]
    fn wrong_length_is_a_fault_and_disconnects() {
        let (mut conn, mut client) = pair();
        // length says 3, but the third byte is not NUL
        let mut frame = 3u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"ABC");
        client.write_all(&frame).unwrap();
        assert_eq!(
            conn.receive(Duration::from_secs(1)),
            Err(TransportFault::MissingTerminator)
        );
        assert!(!conn.is_connected());
        assert_eq!(conn.send("ROUND_END"), Err(TransportFault::Disconnected));
    }

    #[test]
    fn nul_inside_the_declared_length_is_a_fault() {
        let (mut conn, mut client) = pair();
        let mut frame = 7u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"SLE\0EP\0");
        client.write_all(&frame).unwrap();
        assert_eq!(
            conn.receive(Duration::from_secs(1)),
            Err(TransportFault::EarlyTerminator(3))
        );
        assert!(!conn.is_connected());
    }

    #[test]
    fn slow_reader_cannot_stretch_a_send() {
        let (mut conn, mut client) = pair();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 64 * 1024];
            loop {
                match client.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });

        // draining this at the reader's pace takes seconds
        let payload = "A".repeat(64 * 1024 * 1024);
        let start = Instant::now();
        assert_eq!(conn.send(&payload), Err(TransportFault::SendTimeout));
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert!(!conn.is_connected());
        reader.join().unwrap();
    }

    #[test]
    fn truncated_frame_is_a_fault() {
        let (mut conn, mut client) = pair();
        let mut frame = 10u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"SLE");
        client.write_all(&frame).unwrap();
        drop(client);
        assert_eq!(
            conn.receive(Duration::from_secs(1)),
            Err(TransportFault::Truncated)
        );
    }

    #[test]
    fn closed_peer_is_a_fault() {
        let (mut conn, client) = pair();
        drop(client);
        assert_eq!(
            conn.receive(Duration::from_secs(1)),
            Err(TransportFault::ClosedByPeer)
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (mut conn, _client) = pair();
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
    }

    #[test]
    fn accept_reads_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = thread::spawn(move || {
            let mut client = AgentConnection::connect(addr, SEND_TIMEOUT).unwrap();
            client.send("CONNECT ( blue )").unwrap();
            client
        });
        let (conn, group) = AgentConnection::accept(&listener, Duration::from_secs(2), SEND_TIMEOUT)
            .unwrap()
            .expect("an agent connects");
        assert_eq!(group, "blue");
        assert!(conn.is_connected());
        agent.join().unwrap();
    }

    #[test]
    fn accept_rejects_other_first_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = thread::spawn(move || {
            let mut client = AgentConnection::connect(addr, SEND_TIMEOUT).unwrap();
            client.send("SLEEP").unwrap();
            client
        });
        let accepted =
            AgentConnection::accept(&listener, Duration::from_secs(2), SEND_TIMEOUT).unwrap();
        assert!(accepted.is_none());
        agent.join().unwrap();
    }

    #[test]
    fn accept_gives_up_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let start = Instant::now();
        let accepted =
            AgentConnection::accept(&listener, Duration::from_millis(50), SEND_TIMEOUT).unwrap();
        assert!(accepted.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
