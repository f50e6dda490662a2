//! Fixtures shared by the integration tests.
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use visionary_client::config::{Builder, Config};
use visionary_emulator::{
    server::{self, Server},
    synthetic::SyntheticDevice,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// An emulated camera serving on ephemeral loopback ports.
pub struct Emulator {
    pub server: Server<SyntheticDevice>,
    pub control_port: u16,
    pub streaming_port: u16,
}

impl Emulator {
    pub fn spawn(width: u32, height: u32) -> io::Result<Emulator> {
        let control = TcpListener::bind((LOCALHOST, 0))?;
        let streaming = TcpListener::bind((LOCALHOST, 0))?;
        let control_port = control.local_addr()?.port();
        let streaming_port = streaming.local_addr()?.port();

        let server = server::Builder::new()
            .rw_timeout(Duration::from_secs(5))
            .frame_interval(Duration::from_millis(10))
            .build(SyntheticDevice::new(width, height));
        {
            let server = server.clone();
            thread::spawn(move || server.serve_control(control));
        }
        {
            let server = server.clone();
            thread::spawn(move || server.serve_streaming(streaming));
        }
        Ok(Emulator {
            server,
            control_port,
            streaming_port,
        })
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.control_port)
    }

    /// Client configuration pointing at this emulator.
    pub fn client_config(&self, timeout: Duration) -> Config {
        Builder::new()
            .control_port(self.control_port)
            .streaming_port(self.streaming_port)
            .connect_timeout(timeout)
            .rw_timeout(Some(timeout))
            .build()
    }
}
