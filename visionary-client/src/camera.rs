use std::{
    io::{Read, Write},
    net::{IpAddr, SocketAddr},
};

use visionary_protocol::blob::FrameBlob;

use crate::{
    acquisition::Acquisition, config::Config, control::Control, error::Result, stream::Streaming,
};

/// A streaming camera: a control session plus a running acquisition.
pub struct Camera {
    control: Control,
    acquisition: Acquisition,
}

impl Camera {
    /// Opens both channels, starts streaming and spawns the acquisition thread.
    pub fn connect(ip: IpAddr, config: Config) -> Result<Camera> {
        let mut control = Control::connect(
            SocketAddr::new(ip, config.control_port),
            config.connect_timeout,
            config.read_write_timeout,
        )?;
        let streaming = Streaming::connect(
            SocketAddr::new(ip, config.streaming_port),
            config.connect_timeout,
            config.read_write_timeout,
        )?;
        control.init_stream()?;
        control.start_stream()?;
        let acquisition = stop_on_error(
            &mut control,
            Acquisition::start(streaming, config.max_acquisition_attempts),
        )?;
        log::info!("Camera {} connected", ip);
        Ok(Camera {
            control,
            acquisition,
        })
    }

    /// Waits for the next frame. The frame is valid until the next call.
    pub fn next_frame(&mut self) -> Result<&FrameBlob> {
        self.acquisition.next_frame()
    }

    pub fn control(&mut self) -> &mut Control {
        &mut self.control
    }

    /// Stops the acquisition, stops streaming and closes the control session.
    pub fn disconnect(self) -> Result<()> {
        let Camera {
            control,
            mut acquisition,
        } = self;
        acquisition.stop();
        control.close()
    }
}

/// Stops a started stream when `result` failed, so the device does not keep sending.
fn stop_on_error<S: Read + Write, T>(control: &mut Control<S>, result: Result<T>) -> Result<T> {
    if result.is_err()
        && control.is_streaming()
        && let Err(err) = control.stop_stream()
    {
        log::warn!("Stopping the stream failed: {}", err);
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        Error,
        control::test::{MockStream, access_mode_reply, sent_commands},
    };
    use visionary_protocol::{AccessMode, Command, Reply, method};

    fn method_reply(name: &str) -> Reply {
        Reply::Method {
            name: name.to_string(),
            data: Box::default(),
        }
    }

    #[test]
    fn failed_start_stops_stream() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            method_reply(method::GET_BLOB_CLIENT_CONFIG),
            method_reply(method::PLAY_START),
            method_reply(method::PLAY_STOP),
        ]))
        .unwrap();
        control.init_stream().unwrap();
        control.start_stream().unwrap();

        let result = stop_on_error(&mut control, Err::<(), _>(Error::Disconnected));
        assert!(matches!(result, Err(Error::Disconnected)));
        assert!(!control.is_streaming());
        assert_eq!(
            sent_commands(&control.get_ref().output).last(),
            Some(&Command::method(method::PLAY_STOP))
        );
    }

    #[test]
    fn success_keeps_streaming() {
        let mut control = Control::new(MockStream::with_replies(&[
            access_mode_reply(AccessMode::Run),
            method_reply(method::GET_BLOB_CLIENT_CONFIG),
            method_reply(method::PLAY_START),
        ]))
        .unwrap();
        control.init_stream().unwrap();
        control.start_stream().unwrap();

        assert_eq!(stop_on_error(&mut control, Ok(5)).unwrap(), 5);
        assert!(control.is_streaming());
    }
}
