use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stepbus_runtime::bus::bridge::DEFAULT_BAUDRATE;
use stepbus_runtime::bus::{MockBus, QueuedBus, SerialBridge, Transport};
use stepbus_runtime::config::{BRIDGE_PORT, BusConfig};
use stepbus_runtime::motor::{MotorDriver, Registry};

/// Stepper motor bus runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the bus bridge
    #[arg(long, default_value = BRIDGE_PORT)]
    port: String,

    /// Bridge baudrate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// JSON motor table replacing the built-in one
    #[arg(long)]
    motors: Option<PathBuf>,

    /// Do not send settings to the motors on startup
    #[arg(long)]
    skip_init: bool,

    /// Run against a simulated bus instead of the bridge
    #[arg(long)]
    simulate: bool,
}

// Every motor reports idle, on and homed
fn simulated_bus(config: &BusConfig) -> MockBus {
    let bus = MockBus::new();
    for motor in &config.motors {
        bus.set_idle_response(motor.address, &[0x03, 0x00, 0x00]);
    }
    bus
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &args.motors {
        Some(path) => {
            info!("Loading motor table from {}", path.display());
            BusConfig::load(path)?
        }
        None => BusConfig::default(),
    };
    let registry = Registry::new(&config)?;

    let bus: Arc<dyn Transport> = if args.simulate {
        info!("Using simulated bus");
        Arc::new(simulated_bus(&config))
    } else {
        info!("Opening bus bridge on {} at {} baud", args.port, args.baud);
        let bridge = SerialBridge::open(&args.port, args.baud)?;
        Arc::new(QueuedBus::spawn(bridge))
    };

    let driver = Arc::new(MotorDriver::new(registry, bus));
    if !args.skip_init {
        match driver.initialize().await {
            // Recovery already reset every motor, clients can retry init
            Err(e) if e.is_fault() => warn!("Initialization hit a latched fault: {}", e),
            result => result?,
        }
    }

    stepbus_runtime::runtime::run(driver).await
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
