//! # Visionary-T command line tool
//!
//! Configures SICK Visionary-T cameras, grabs frames from them and runs a
//! loopback emulator of the device.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_num::number_range;
use env_logger::Env;
use visionary_client::{
    Camera,
    channels::{Channels, point_cloud},
    config::Builder,
    control::Control,
};
use visionary_emulator::{server, synthetic::SyntheticDevice};
use visionary_protocol::{API_VERSION, CONTROL_PORT, STREAMING_PORT};

fn integration_time_us(s: &str) -> Result<u32, String> {
    number_range(s, 1, 25_000)
}

fn frame_count(s: &str) -> Result<u32, String> {
    number_range(s, 1, 1_000_000)
}

fn image_dimension(s: &str) -> Result<u32, String> {
    number_range(s, 1, 4096)
}

#[derive(Subcommand, Eq, PartialEq, Clone)]
enum Action {
    /// Print the access mode and the acquisition settings
    Info,
    /// Change acquisition settings
    Set {
        #[arg(long, value_parser = integration_time_us)]
        integration_time_us: Option<u32>,
        #[arg(long)]
        modulation_frequency: Option<u8>,
    },
    /// Acquire frames and report their distance statistics
    Grab {
        #[arg(short, long, default_value = "10", value_parser = frame_count)]
        count: u32,
    },
    /// Emulate a camera on the given address and ports
    Emulate {
        #[arg(long, default_value = "176", value_parser = image_dimension)]
        width: u32,
        #[arg(long, default_value = "144", value_parser = image_dimension)]
        height: u32,
        #[arg(long, help = "Pause between two frames in milliseconds", default_value = "50")]
        frame_interval_ms: u64,
    },
}

#[derive(Parser)]
#[command(about = "Control and acquisition tool for SICK Visionary-T cameras", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "192.168.1.10")]
    ip: IpAddr,

    #[arg(long, default_value_t = CONTROL_PORT)]
    control_port: u16,

    #[arg(long, default_value_t = STREAMING_PORT)]
    streaming_port: u16,

    #[arg(short, long, help = "TCP timeout in milliseconds", default_value = "5000")]
    timeout_ms: u64,

    #[clap(subcommand)]
    action: Action,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Visionary API {}", API_VERSION);
    log::debug!(
        "Parsed arguments: ip={}, control_port={}, streaming_port={}",
        args.ip,
        args.control_port,
        args.streaming_port
    );

    let timeout = Duration::from_millis(args.timeout_ms);
    let config = Builder::new()
        .control_port(args.control_port)
        .streaming_port(args.streaming_port)
        .connect_timeout(timeout)
        .rw_timeout(Some(timeout))
        .build();
    let control_addr = SocketAddr::new(args.ip, args.control_port);

    match args.action {
        Action::Info => {
            let mut control =
                Control::connect(control_addr, config.connect_timeout, config.read_write_timeout)?;
            println!("Access mode:          {}", control.access_mode());
            println!("Integration time:     {} us", control.integration_time_us()?);
            println!("Modulation frequency: {}", control.modulation_frequency()?);
            control.close()?;
        }
        Action::Set {
            integration_time_us,
            modulation_frequency,
        } => {
            let mut control =
                Control::connect(control_addr, config.connect_timeout, config.read_write_timeout)?;
            if let Some(value) = integration_time_us {
                control.set_integration_time_us(value)?;
                log::info!("Integration time set to {} us", value);
            }
            if let Some(value) = modulation_frequency {
                control.set_modulation_frequency(value)?;
                log::info!("Modulation frequency set to {}", value);
            }
            control.close()?;
        }
        Action::Grab { count } => {
            let mut camera = Camera::connect(args.ip, config)?;
            for _ in 0..count {
                let frame = camera.next_frame()?;
                let channels = Channels::decode(frame);
                let valid: Vec<u16> = channels
                    .distance
                    .iter()
                    .copied()
                    .filter(|d| *d > 0)
                    .collect();
                let mean =
                    valid.iter().map(|d| *d as u64).sum::<u64>() / valid.len().max(1) as u64;
                let centre = point_cloud(frame)
                    [(channels.height / 2 * channels.width + channels.width / 2) as usize];
                println!(
                    "Frame {:>6} @ {:>12} us: {}x{}, distance min {} max {} mean {} mm, \
                     centre ({:.1}, {:.1}, {:.1})",
                    frame.frame_number(),
                    frame.timestamp(),
                    channels.width,
                    channels.height,
                    valid.iter().min().copied().unwrap_or(0),
                    valid.iter().max().copied().unwrap_or(0),
                    mean,
                    centre.x,
                    centre.y,
                    centre.z
                );
            }
            camera.disconnect()?;
        }
        Action::Emulate {
            width,
            height,
            frame_interval_ms,
        } => {
            let server = server::Builder::new()
                .rw_timeout(timeout.max(Duration::from_secs(1)))
                .frame_interval(Duration::from_millis(frame_interval_ms))
                .build(SyntheticDevice::new(width, height));
            log::info!("Emulating a {}x{} camera", width, height);
            server.listen(args.ip, args.control_port, args.streaming_port)?;
        }
    }
    Ok(())
}
