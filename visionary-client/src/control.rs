//! The CoLa control channel.
use std::{
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use visionary_protocol::{AccessMode, Command, Reply, Variable, VariableKind, method};

use crate::error::{Error, Result};

/// An open control session with a camera.
///
/// The session tracks the access mode granted by the device. The mode can
/// only be raised by the client; requests for a lower or equal mode are no-ops.
pub struct Control<S = TcpStream> {
    stream: S,
    access_mode: AccessMode,
    stream_initialized: bool,
    streaming: bool,
}

impl Control<TcpStream> {
    pub fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        read_write_timeout: Option<Duration>,
    ) -> Result<Control<TcpStream>> {
        log::info!("Connecting control channel to {}", addr);
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)?;
        tcp.set_read_timeout(read_write_timeout)?;
        tcp.set_write_timeout(read_write_timeout)?;
        tcp.set_nodelay(true)?;
        Control::new(tcp)
    }
}

impl<S: Read + Write> Control<S> {
    /// Opens a session on an established connection and queries the initial access mode.
    pub fn new(stream: S) -> Result<Control<S>> {
        let mut control = Control {
            stream,
            access_mode: AccessMode::Run,
            stream_initialized: false,
            streaming: false,
        };
        control.access_mode = control.query_access_mode()?;
        log::info!(
            "Control session opened in access mode {}",
            control.access_mode
        );
        Ok(control)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// The access mode of this session as last confirmed by the device.
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn transact(&mut self, command: &Command) -> Result<Reply> {
        log::debug!("Sending command {:?}", command);
        command.write_to(&mut self.stream)?;
        let reply = Reply::from_reader(&mut self.stream)?;
        log::debug!("Received reply {}", reply);
        Ok(reply)
    }

    fn invoke(&mut self, name: &str) -> Result<Reply> {
        let reply = self.transact(&Command::method(name))?;
        match &reply {
            Reply::Method { name: answered, .. } if answered == name => Ok(reply),
            _ => Err(Error::rejected(format!("invoke {}", name), reply)),
        }
    }

    /// Asks the device for the access mode of this session.
    pub fn query_access_mode(&mut self) -> Result<AccessMode> {
        let reply = self.transact(&Command::GetAccessMode)?;
        if let Reply::Method { name, data } = &reply
            && name == method::GET_ACCESS_MODE
            && let Some(mode) = data.last().and_then(|mode| AccessMode::from_u8(*mode))
        {
            return Ok(mode);
        }
        Err(Error::rejected("query access mode", reply))
    }

    /// Raises the access mode of this session to `mode`.
    ///
    /// Nothing is sent if the session already holds `mode` or a higher mode.
    pub fn set_access_mode(&mut self, mode: AccessMode) -> Result<()> {
        if mode <= self.access_mode {
            log::debug!(
                "Access mode {} already covers {}, not switching",
                self.access_mode,
                mode
            );
            return Ok(());
        }
        let reply = self.transact(&Command::set_access_mode(mode))?;
        match &reply {
            Reply::Method { name, .. }
                if name == method::SET_ACCESS_MODE && reply.is_success() =>
            {
                log::info!("Switched access mode from {} to {}", self.access_mode, mode);
                self.access_mode = mode;
                Ok(())
            }
            _ => Err(Error::rejected(format!("set access mode to {}", mode), reply)),
        }
    }

    /// Reads variable `name` and returns the trailing `size` bytes of the reply.
    fn read_raw(&mut self, name: &str, size: usize) -> Result<Box<[u8]>> {
        let reply = self.transact(&Command::ReadVariable {
            name: name.to_string(),
        })?;
        match &reply {
            Reply::Read {
                name: answered,
                value,
            } if answered == name && value.len() >= size => Ok(value[value.len() - size..].into()),
            _ => Err(Error::rejected(format!("read variable {}", name), reply)),
        }
    }

    fn write_raw(&mut self, name: &str, value: Box<[u8]>) -> Result<()> {
        let reply = self.transact(&Command::WriteVariable {
            name: name.to_string(),
            value,
        })?;
        match reply {
            Reply::Write { .. } => Ok(()),
            _ => Err(Error::rejected(format!("write variable {}", name), reply)),
        }
    }

    pub fn read_byte(&mut self, name: &str) -> Result<u8> {
        let value = self.read_raw(name, VariableKind::Byte.size())?;
        Ok(value[0])
    }

    pub fn read_int(&mut self, name: &str) -> Result<i32> {
        let value = self.read_raw(name, VariableKind::Int32.size())?;
        Ok(i32::from_be_bytes([value[0], value[1], value[2], value[3]]))
    }

    pub fn write_byte(&mut self, name: &str, value: u8) -> Result<()> {
        self.write_raw(name, Box::new([value]))
    }

    pub fn write_int(&mut self, name: &str, value: i32) -> Result<()> {
        self.write_raw(name, Box::new(value.to_be_bytes()))
    }

    /// Reads a described variable, widening byte variables to `i32`.
    pub fn read_variable(&mut self, variable: &Variable) -> Result<i32> {
        let value = self.read_raw(variable.name, variable.kind.size())?;
        Ok(match variable.kind {
            VariableKind::Byte => value[0] as i32,
            VariableKind::Int32 => i32::from_be_bytes([value[0], value[1], value[2], value[3]]),
        })
    }

    /// Writes a described variable, raising the access mode first if the variable needs it.
    pub fn write_variable(&mut self, variable: &Variable, value: i32) -> Result<()> {
        self.set_access_mode(variable.write_access)?;
        match variable.kind {
            VariableKind::Byte => {
                let value = u8::try_from(value).map_err(|_| {
                    io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("{} does not fit into byte variable {}", value, variable.name),
                    )
                })?;
                self.write_byte(variable.name, value)
            }
            VariableKind::Int32 => self.write_int(variable.name, value),
        }
    }

    pub fn integration_time_us(&mut self) -> Result<u32> {
        Ok(self.read_variable(&Variable::INTEGRATION_TIME_US)? as u32)
    }

    /// Sets the integration time. Requires, and if necessary requests, the `Service` access mode.
    pub fn set_integration_time_us(&mut self, integration_time_us: u32) -> Result<()> {
        let value = i32::try_from(integration_time_us).map_err(|_| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("Integration time {} us out of range", integration_time_us),
            )
        })?;
        self.write_variable(&Variable::INTEGRATION_TIME_US, value)
    }

    pub fn modulation_frequency(&mut self) -> Result<u8> {
        self.read_byte(Variable::MODULATION_FREQUENCY.name)
    }

    /// Sets the modulation frequency. Requires, and if necessary requests, the
    /// `AuthorizedClient` access mode.
    pub fn set_modulation_frequency(&mut self, value: u8) -> Result<()> {
        self.write_variable(&Variable::MODULATION_FREQUENCY, value as i32)
    }

    /// Performs the `GetBlobClientConfig` handshake that announces a streaming client.
    pub fn init_stream(&mut self) -> Result<()> {
        self.invoke(method::GET_BLOB_CLIENT_CONFIG)?;
        self.stream_initialized = true;
        log::debug!("Blob client configured");
        Ok(())
    }

    pub fn start_stream(&mut self) -> Result<()> {
        if !self.stream_initialized {
            return Err(Error::StreamNotInitialized);
        }
        self.invoke(method::PLAY_START)?;
        self.streaming = true;
        log::info!("Streaming started");
        Ok(())
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        if !self.stream_initialized {
            return Err(Error::StreamNotInitialized);
        }
        self.invoke(method::PLAY_STOP)?;
        self.streaming = false;
        log::info!("Streaming stopped");
        Ok(())
    }

    /// Stops streaming if it was started and closes the session.
    pub fn close(mut self) -> Result<()> {
        if self.streaming {
            self.stop_stream()?;
        }
        log::info!("Control session closed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::io::Cursor;
    use visionary_protocol::error::ReadError;

    /// In-memory stream answering with prepared replies and recording what was written.
    pub(crate) struct MockStream {
        input: Cursor<Vec<u8>>,
        pub(crate) output: Vec<u8>,
    }

    impl MockStream {
        pub(crate) fn new(input: Vec<u8>) -> MockStream {
            MockStream {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        pub(crate) fn with_replies(replies: &[Reply]) -> MockStream {
            let mut input = Vec::new();
            for reply in replies {
                reply.write_to(&mut input).unwrap();
            }
            MockStream::new(input)
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn sent_commands(output: &[u8]) -> Vec<Command> {
        let mut cursor = Cursor::new(output);
        let mut commands = Vec::new();
        loop {
            match Command::from_reader(&mut cursor) {
                Ok(command) => commands.push(command),
                Err(ReadError::EmptyResponse) => return commands,
                Err(other) => panic!("unexpected data written: {:?}", other),
            }
        }
    }

    pub(crate) fn access_mode_reply(mode: AccessMode) -> Reply {
        Reply::Method {
            name: method::GET_ACCESS_MODE.to_string(),
            data: Box::new([mode as u8]),
        }
    }

    fn set_access_mode_reply(success: bool) -> Reply {
        Reply::Method {
            name: method::SET_ACCESS_MODE.to_string(),
            data: Box::new([success as u8]),
        }
    }

    #[test]
    fn queries_initial_access_mode() {
        let control =
            Control::new(MockStream::with_replies(&[access_mode_reply(AccessMode::Operator)]))
                .unwrap();
        assert_eq!(control.access_mode(), AccessMode::Operator);
        assert_eq!(
            sent_commands(&control.get_ref().output),
            vec![Command::GetAccessMode]
        );
    }

    #[test]
    fn lower_or_equal_access_mode_sends_nothing() {
        let mut control = Control::new(MockStream::with_replies(&[access_mode_reply(
            AccessMode::AuthorizedClient,
        )]))
        .unwrap();
        let written = control.get_ref().output.len();
        control.set_access_mode(AccessMode::Operator).unwrap();
        control.set_access_mode(AccessMode::AuthorizedClient).unwrap();
        assert_eq!(control.get_ref().output.len(), written);
        assert_eq!(control.access_mode(), AccessMode::AuthorizedClient);
    }

    #[test]
    fn higher_access_mode_sends_one_command() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            set_access_mode_reply(true),
        ]))
        .unwrap();
        control.set_access_mode(AccessMode::Service).unwrap();
        assert_eq!(control.access_mode(), AccessMode::Service);

        let commands = sent_commands(&control.get_ref().output);
        assert_eq!(
            commands,
            vec![
                Command::GetAccessMode,
                Command::SetAccessMode {
                    mode: AccessMode::Service,
                    digest: 0x81BE_23AA
                }
            ]
        );
    }

    #[test]
    fn refused_access_mode_keeps_state() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            set_access_mode_reply(false),
        ]))
        .unwrap();
        let err = control.set_access_mode(AccessMode::Service).unwrap_err();
        assert!(err.to_string().contains("set access mode to Service"));
        assert_eq!(control.access_mode(), AccessMode::Run);
    }

    #[test]
    fn read_uses_trailing_bytes() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            Reply::Read {
                name: "integrationTimeUs".to_string(),
                value: Box::new([0x00, 0x00, 0x0B, 0xB8]),
            },
            Reply::Read {
                name: "modulationFrequency".to_string(),
                value: Box::new([0x02]),
            },
        ]))
        .unwrap();
        assert_eq!(control.integration_time_us().unwrap(), 3000);
        assert_eq!(control.modulation_frequency().unwrap(), 2);
    }

    #[test]
    fn short_reply_is_rejected() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            Reply::Read {
                name: "integrationTimeUs".to_string(),
                value: Box::new([0x0B, 0xB8]),
            },
            Reply::Read {
                name: "modulationFrequency".to_string(),
                value: Box::new([0x00, 0x01]),
            },
        ]))
        .unwrap();
        assert!(matches!(
            control.read_variable(&Variable::INTEGRATION_TIME_US),
            Err(Error::Rejected { .. })
        ));
        assert_eq!(
            control
                .read_variable(&Variable::MODULATION_FREQUENCY)
                .unwrap(),
            1
        );
    }

    #[test]
    fn write_requires_acknowledge() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Service),
            Reply::Error { code: 0x0B },
        ]))
        .unwrap();
        match control.write_int("integrationTimeUs", 500) {
            Err(Error::Rejected { action, reply }) => {
                assert_eq!(action, "write variable integrationTimeUs");
                assert_eq!(reply, Reply::Error { code: 0x0B });
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn integration_time_raises_to_service() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            set_access_mode_reply(true),
            Reply::Write {
                name: "integrationTimeUs".to_string(),
            },
        ]))
        .unwrap();
        control.set_integration_time_us(1500).unwrap();
        let commands = sent_commands(&control.get_ref().output);
        assert_eq!(
            commands[1..],
            [
                Command::set_access_mode(AccessMode::Service),
                Command::WriteVariable {
                    name: "integrationTimeUs".to_string(),
                    value: Box::new(1500_i32.to_be_bytes()),
                }
            ]
        );
    }

    #[test]
    fn modulation_frequency_must_fit_a_byte() {
        let mut control = Control::new(MockStream::with_replies(&[access_mode_reply(
            AccessMode::AuthorizedClient,
        )]))
        .unwrap();
        assert!(matches!(
            control.write_variable(&Variable::MODULATION_FREQUENCY, 300),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn streaming_needs_blob_client_config() {
        let mut control =
            Control::new(MockStream::with_replies(&[access_mode_reply(AccessMode::Run)])).unwrap();
        let written = control.get_ref().output.len();
        assert!(matches!(
            control.start_stream(),
            Err(Error::StreamNotInitialized)
        ));
        assert!(matches!(
            control.stop_stream(),
            Err(Error::StreamNotInitialized)
        ));
        assert_eq!(control.get_ref().output.len(), written);
    }

    #[test]
    fn start_and_close_stops_streaming() {
        let method_reply = |name: &str| Reply::Method {
            name: name.to_string(),
            data: Box::default(),
        };
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            method_reply(method::GET_BLOB_CLIENT_CONFIG),
            method_reply(method::PLAY_START),
            method_reply(method::PLAY_STOP),
        ]))
        .unwrap();
        control.init_stream().unwrap();
        control.start_stream().unwrap();
        assert!(control.is_streaming());
        control.close().unwrap();
    }

    #[test]
    fn missing_reply_is_reported() {
        let mut control =
            Control::new(MockStream::with_replies(&[access_mode_reply(AccessMode::Run)])).unwrap();
        assert!(matches!(
            control.init_stream(),
            Err(Error::Protocol(ReadError::EmptyResponse))
        ));
    }
}
