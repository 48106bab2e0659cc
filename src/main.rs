//! CLI entry point for the AstroLink driver.
//!
//! Connects to the device (or the offline simulator), runs the poll
//! loop, and prints state. Intended for bring-up and bench testing; the
//! library crate is the integration surface.
//!
//! ```bash
//! astrolink ports
//! astrolink status --port /dev/ttyUSB0
//! astrolink run --simulate
//! ```

use anyhow::Result;
use astrolink::{AstroLink, DeviceConfig, DeviceState, PropertyState};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "astrolink")]
#[command(about = "AstroLink 4 mini II focuser/power controller driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectArgs {
    /// Serial port path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = 38_400)]
    baud: u32,

    /// Number of focuser channels
    #[arg(long, default_value_t = 1)]
    channels: u8,

    /// TOML config file; command-line flags are ignored when set
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the offline simulator instead of a real port
    #[arg(long)]
    simulate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and poll until interrupted
    Run(ConnectArgs),

    /// Connect, run one poll tick, print the state
    Status(ConnectArgs),

    /// List available serial ports
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status(args) => status(args).await,
        Commands::Ports => list_ports(),
    }
}

async fn open_device(args: &ConnectArgs) -> Result<AstroLink> {
    let config = match &args.config {
        Some(path) => DeviceConfig::from_toml_file(path)?,
        None => {
            let mut config = DeviceConfig::new(&args.port);
            config.baud = args.baud;
            config.channels = args.channels;
            config.validate()?;
            config
        }
    };

    if args.simulate {
        Ok(AstroLink::simulated(config).await?)
    } else {
        AstroLink::open(config).await
    }
}

async fn run(args: ConnectArgs) -> Result<()> {
    let device = open_device(&args).await?;
    let poll = device.spawn_poll_task();

    println!("connected; polling (ctrl-c to stop)");
    tokio::signal::ctrl_c().await?;

    poll.stop().await;
    print_state(&device.snapshot().await);
    Ok(())
}

async fn status(args: ConnectArgs) -> Result<()> {
    let device = open_device(&args).await?;
    device.poll_once().await?;
    print_state(&device.snapshot().await);
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

fn print_state(state: &DeviceState) {
    println!("model:    {}", state.model);
    if let Some(firmware) = &state.firmware {
        println!("firmware: {firmware}");
    }
    if let Some(code) = &state.device_code {
        println!("code:     {code}");
    }

    for (index, ch) in state.channels.iter().enumerate() {
        println!(
            "focuser {index}: {} ticks ({:.3} mm), {} to go, {}",
            ch.position,
            ch.position_mm,
            ch.steps_to_go,
            state_label(ch.motion),
        );
        println!(
            "  max {}, reverse {}, step {:.2} um, comp {:.2} steps/C (threshold {:.0}, {})",
            ch.settings.max_position,
            ch.settings.reverse,
            ch.settings.step_size_um,
            ch.settings.comp_steps_per_c,
            ch.settings.comp_threshold,
            if ch.settings.comp_auto { "auto" } else { "manual" },
        );
    }

    for (index, sensor) in state.sensors.iter().enumerate() {
        if sensor.present {
            println!(
                "sensor {index}: {:.2} C, {:.0}% RH, dew point {:.2} C",
                sensor.temperature, sensor.humidity, sensor.dew_point,
            );
        }
    }

    if state.power.state == PropertyState::Ok {
        println!(
            "power:    {:.2} A, Vin {:.2} V, Vreg {:.2} V, {:.2} Ah, {:.2} Wh",
            state.power.total_current,
            state.power.vin,
            state.power.vreg,
            state.power.amp_hours,
            state.power.watt_hours,
        );
    }
}

fn state_label(state: PropertyState) -> &'static str {
    match state {
        PropertyState::Idle => "idle",
        PropertyState::Ok => "settled",
        PropertyState::Busy => "moving",
        PropertyState::Alert => "alert",
    }
}
