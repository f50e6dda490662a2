use std::{
    io::{self, ErrorKind, Read},
    net::{IpAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crate::{DeviceError, VisionaryDevice};
use visionary_protocol::{
    AccessMode, Command, HEARTBEAT, Reply, codec::write_blob_package, error::ReadError, method,
};

const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Config {
    pub read_write_timeout: Duration,
    /// Pause between two blobs on a streaming connection.
    pub frame_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_write_timeout: Duration::from_secs(30),
            frame_interval: Duration::from_millis(50),
        }
    }
}

pub struct Server<T: VisionaryDevice> {
    device: Arc<T>,
    config: Config,
    playing: Arc<AtomicBool>,
}

impl<T: VisionaryDevice> Clone for Server<T> {
    fn clone(&self) -> Self {
        Server {
            device: self.device.clone(),
            config: self.config.clone(),
            playing: self.playing.clone(),
        }
    }
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```
/// use visionary_emulator::{server::Builder, synthetic::SyntheticDevice};
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .rw_timeout(Duration::from_secs(20))
///     .frame_interval(Duration::from_millis(10))
///     .build(SyntheticDevice::new(4, 4));
/// assert!(!server.is_playing());
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Set the pause between two streamed blobs
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.config.frame_interval = interval;
        self
    }

    /// Build and return the server
    pub fn build<T: VisionaryDevice + Send + Sync + 'static>(self, device: T) -> Server<T> {
        Server::new(device, self.config)
    }
}

impl<T: VisionaryDevice + Send + Sync + 'static> Server<T> {
    pub fn new(device: T, config: Config) -> Server<T> {
        Server {
            device: Arc::new(device),
            config,
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn device(&self) -> &T {
        &self.device
    }

    /// Whether `PLAYSTART` has been received without a later `PLAYSTOP`.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Binds both ports and serves them until the control listener fails.
    pub fn listen(&self, ip: IpAddr, control_port: u16, streaming_port: u16) -> io::Result<()> {
        let control = TcpListener::bind((ip, control_port))?;
        let streaming = TcpListener::bind((ip, streaming_port))?;
        log::info!(
            "Emulator listening on {} (control {}, streaming {})",
            ip,
            control_port,
            streaming_port
        );
        let server = self.clone();
        thread::spawn(move || server.serve_streaming(streaming));
        self.serve_control(control);
        Ok(())
    }

    /// Accepts control connections, each served on its own thread.
    pub fn serve_control(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(addr) = tcp.peer_addr() {
                        log::info!("New control connection from {}", addr);
                    }
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_control(tcp) {
                            log::error!("Control client error: {}", e);
                        }
                    });
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    /// Accepts streaming connections, each served on its own thread.
    pub fn serve_streaming(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    if let Ok(addr) = tcp.peer_addr() {
                        log::info!("New streaming connection from {}", addr);
                    }
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_streaming(tcp) {
                            log::error!("Streaming client error: {}", e);
                        }
                    });
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    fn handle_control(&self, mut tcp: TcpStream) -> Result<(), ReadError> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;

        let mut mode = AccessMode::Run;
        loop {
            let reply = match Command::from_reader(&mut tcp) {
                Ok(command) => self.process_command(command, &mut mode),
                Err(ReadError::EmptyResponse) => break,
                Err(ReadError::InvalidFormat(message)) => {
                    log::warn!("Malformed command: {}", message);
                    Reply::Error {
                        code: DeviceError::UnknownMethod.code(),
                    }
                }
                Err(ReadError::IoError(err)) if is_timeout(&err) => {
                    log::error!("Client read timeout, closing connection");
                    break;
                }
                Err(ReadError::IoError(err))
                    if err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset
                        || err.kind() == ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(other) => return Err(other),
            };
            log::debug!("Sending reply {}", reply);
            reply.write_to(&mut tcp)?;
        }
        log::info!("Control connection closed");
        Ok(())
    }

    /// Answers one command for a session currently holding `mode`.
    fn process_command(&self, command: Command, mode: &mut AccessMode) -> Reply {
        log::debug!("Received command {:?}", command);
        match command {
            Command::GetAccessMode => Reply::Method {
                name: method::GET_ACCESS_MODE.to_string(),
                data: Box::new([*mode as u8]),
            },
            Command::SetAccessMode {
                mode: requested,
                digest,
            } => {
                let granted = digest == requested.digest();
                if granted {
                    log::info!("Access mode changed from {} to {}", mode, requested);
                    *mode = requested;
                } else {
                    log::warn!("Wrong password digest {:08x} for {}", digest, requested);
                }
                Reply::Method {
                    name: method::SET_ACCESS_MODE.to_string(),
                    data: Box::new([granted as u8]),
                }
            }
            Command::ReadVariable { name } => match self.device.read_variable(&name) {
                Ok(value) => Reply::Read { name, value },
                Err(err) => refuse(&name, err),
            },
            Command::WriteVariable { name, value } => {
                match self.device.write_variable(&name, &value, *mode) {
                    Ok(()) => Reply::Write { name },
                    Err(err) => refuse(&name, err),
                }
            }
            Command::Method { name } => {
                match name.as_str() {
                    method::GET_BLOB_CLIENT_CONFIG => {}
                    method::PLAY_START => {
                        log::info!("Streaming started");
                        self.playing.store(true, Ordering::SeqCst);
                    }
                    method::PLAY_STOP => {
                        log::info!("Streaming stopped");
                        self.playing.store(false, Ordering::SeqCst);
                    }
                    _ => return refuse(&name, DeviceError::UnknownMethod),
                }
                Reply::Method {
                    name,
                    data: Box::default(),
                }
            }
        }
    }

    fn handle_streaming(&self, mut tcp: TcpStream) -> io::Result<()> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;

        let mut heartbeat = [0u8; HEARTBEAT.len()];
        tcp.read_exact(&mut heartbeat)?;
        if heartbeat != HEARTBEAT {
            log::warn!("Unexpected heartbeat {:02x?}", heartbeat);
        }

        // Reads time out once per frame interval to notice disconnects
        tcp.set_read_timeout(Some(self.config.frame_interval.max(MIN_FRAME_INTERVAL)))?;
        let mut scratch = [0u8; 64];
        loop {
            match tcp.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => log::trace!("Streaming client sent {:02x?}", &scratch[..n]),
                Err(err) if is_timeout(&err) => {}
                Err(err) if is_disconnect(&err) => break,
                Err(err) => return Err(err),
            }
            if self.is_playing() {
                let blob = self.device.next_blob()?;
                match write_blob_package(&mut tcp, &blob) {
                    Ok(()) => log::trace!("Sent blob of {} bytes", blob.len()),
                    Err(err) if is_disconnect(&err) => break,
                    Err(err) => return Err(err),
                }
            }
        }
        log::info!("Streaming connection closed");
        Ok(())
    }
}

fn refuse(name: &str, err: DeviceError) -> Reply {
    log::warn!("Refusing {}: {}", name, err);
    Reply::Error { code: err.code() }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic::SyntheticDevice;

    fn server() -> Server<SyntheticDevice> {
        Builder::new().build(SyntheticDevice::new(2, 2))
    }

    #[test]
    fn access_mode_needs_matching_digest() {
        let server = server();
        let mut mode = AccessMode::Run;
        let reply = server.process_command(
            Command::SetAccessMode {
                mode: AccessMode::Service,
                digest: AccessMode::Operator.digest(),
            },
            &mut mode,
        );
        assert!(!reply.is_success());
        assert_eq!(mode, AccessMode::Run);

        let reply =
            server.process_command(Command::set_access_mode(AccessMode::Service), &mut mode);
        assert!(reply.is_success());
        assert_eq!(mode, AccessMode::Service);
        assert_eq!(
            server.process_command(Command::GetAccessMode, &mut mode),
            Reply::Method {
                name: "GetAccessMode".to_string(),
                data: Box::new([4]),
            }
        );
    }

    #[test]
    fn write_uses_session_mode() {
        let server = server();
        let mut mode = AccessMode::Run;
        let write = Command::WriteVariable {
            name: "integrationTimeUs".to_string(),
            value: Box::new(800_i32.to_be_bytes()),
        };
        assert_eq!(
            server.process_command(write.clone(), &mut mode),
            Reply::Error { code: 0x000A }
        );
        mode = AccessMode::Service;
        assert_eq!(
            server.process_command(write, &mut mode),
            Reply::Write {
                name: "integrationTimeUs".to_string()
            }
        );
        assert_eq!(server.device().variable("integrationTimeUs"), Some(800));
    }

    #[test]
    fn play_toggles_streaming() {
        let server = server();
        let mut mode = AccessMode::Run;
        server.process_command(Command::method(method::PLAY_START), &mut mode);
        assert!(server.is_playing());
        server.process_command(Command::method(method::PLAY_STOP), &mut mode);
        assert!(!server.is_playing());
        assert_eq!(
            server.process_command(Command::method("Reboot"), &mut mode),
            Reply::Error { code: 0x0002 }
        );
    }
}
