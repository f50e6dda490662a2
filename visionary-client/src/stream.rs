//! The streaming channel.
use std::{
    io::{self, BufReader, Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use visionary_protocol::{HEARTBEAT, blob::FrameBlob, codec::read_blob_package, error::ReadError};

use crate::error::Result;

const READ_BUFFER_CAPACITY: usize = 256 * 1024;

/// A connection to the streaming port of a camera.
///
/// Frames only arrive once streaming has been started on the control channel.
pub struct Streaming<S = TcpStream> {
    reader: BufReader<S>,
}

impl Streaming<TcpStream> {
    pub fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        read_write_timeout: Option<Duration>,
    ) -> Result<Streaming<TcpStream>> {
        log::info!("Connecting streaming channel to {}", addr);
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)?;
        tcp.set_read_timeout(read_write_timeout)?;
        tcp.set_write_timeout(read_write_timeout)?;
        Streaming::new(tcp)
    }

    /// A second handle on the socket that can be shut down from another thread
    /// to interrupt a blocking read.
    pub fn shutdown_handle(&self) -> io::Result<TcpStream> {
        self.reader.get_ref().try_clone()
    }
}

impl<S: Read + Write> Streaming<S> {
    /// Wraps an established connection and sends the initial heartbeat.
    pub fn new(stream: S) -> Result<Streaming<S>> {
        let mut streaming = Streaming {
            reader: BufReader::with_capacity(READ_BUFFER_CAPACITY, stream),
        };
        streaming.send_heartbeat()?;
        Ok(streaming)
    }

    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    pub fn send_heartbeat(&mut self) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(HEARTBEAT)?;
        stream.flush()?;
        log::trace!("Heartbeat sent");
        Ok(())
    }

    /// Reads the next package and returns its blob, unparsed.
    pub fn read_blob(&mut self) -> std::result::Result<Box<[u8]>, ReadError> {
        read_blob_package(&mut self.reader)
    }

    pub fn next_frame(&mut self) -> Result<FrameBlob> {
        let frame = FrameBlob::parse(self.read_blob()?)?;
        log::trace!(
            "Received frame {} ({}x{})",
            frame.frame_number(),
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }
}
