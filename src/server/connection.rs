use std::time::Instant;

use mio::net::TcpStream;

#[derive(Debug, PartialEq)]
pub enum ConnectionState {
    ReadRequest,
    /// Request handed to a worker; exempt from the idle timeout.
    AwaitDispatch,
    WriteResponse,
}

pub struct Connection {
    pub stream: TcpStream,

    pub state: ConnectionState,
    pub read_buffer: Vec<u8>,
    pub write_buffer: Vec<u8>,
    pub bytes_written: usize,
    pub last_activity: Instant,
    /// Local port the connection arrived on; selects the document root.
    pub port: u16,
}

impl Connection {
    pub fn new(stream: TcpStream, port: u16) -> Self {
        Self {
            stream,
            state: ConnectionState::ReadRequest,
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::new(),
            bytes_written: 0,
            last_activity: Instant::now(),
            port,
        }
    }
}
