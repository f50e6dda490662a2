use std::time::Duration;

use visionary_protocol::{CONTROL_PORT, STREAMING_PORT};

/// Connection settings used by [`crate::Camera::connect`].
#[derive(Debug, Clone)]
pub struct Config {
    pub control_port: u16,
    pub streaming_port: u16,
    pub connect_timeout: Duration,
    /// TCP read and write timeout of both channels. `None` blocks indefinitely.
    pub read_write_timeout: Option<Duration>,
    /// Consecutive failed reads after which acquisition gives up.
    pub max_acquisition_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            streaming_port: STREAMING_PORT,
            connect_timeout: Duration::from_secs(5),
            read_write_timeout: Some(Duration::from_secs(5)),
            max_acquisition_attempts: 3,
        }
    }
}

/// Builder to create a [Config] and modify its options
///
/// # Example
///
/// ```
/// use visionary_client::config::Builder;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .control_port(12112)
///     .rw_timeout(Some(Duration::from_secs(1)))
///     .build();
/// assert_eq!(config.control_port, 12112);
/// assert_eq!(config.streaming_port, 2113);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    pub fn streaming_port(mut self, port: u16) -> Self {
        self.config.streaming_port = port;
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Set how many consecutive failures the acquisition tolerates. Values below 1
    /// are treated as 1.
    pub fn max_acquisition_attempts(mut self, attempts: u32) -> Self {
        self.config.max_acquisition_attempts = attempts;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
