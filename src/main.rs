use anyhow::Result;
use clap::{Parser, Subcommand};
use rave_led_remote::domain::settings::SettingsService;
use rave_led_remote::domain::state::VISUALS;
use rave_led_remote::domain::text_store::{JsonFileStore, KeyValueStore, TEXTS_KEY};
use rave_led_remote::infrastructure::logging;
use tracing::info;

#[derive(Parser)]
#[command(name = "rave-led-remote", version, about = "Remote control for a BLE LED matrix")]
struct Cli {
    /// Peripheral address to connect to (defaults to the last one used)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Log at debug level regardless of settings
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby LED matrices
    Scan,
    /// Read brightness, speed, color and active selections from the device
    Sync,
    /// Set brightness (0-100)
    Brightness { value: u8 },
    /// Set animation speed (1-200)
    Speed { value: u8 },
    /// Set how often each text repeats (1-10)
    Repeats { value: u8 },
    /// Set the text color
    Color { r: u8, g: u8, b: u8 },
    /// Activate a visual pattern by index
    Visual { index: usize },
    /// List the visual patterns
    Visuals,
    /// Manage scrolling texts
    Text {
        #[command(subcommand)]
        action: TextCommand,
    },
    /// Rebuild the device's text list from the saved one
    Replay,
}

#[derive(Subcommand)]
enum TextCommand {
    Insert { text: String },
    Delete { text: String },
    Activate { text: String },
    Repeats { count: u8 },
    /// Show the saved texts
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = SettingsService::new()?;
    let _logging_guard = logging::init_logger(&settings.get().log_settings, cli.verbose)?;
    info!(
        "Starting Rave LED remote, settings at {}",
        settings.path().display()
    );

    let store = JsonFileStore::new(SettingsService::app_dir()?.join("store.json"));
    info!("Text list stored in {}", store.path().display());

    match cli.command {
        Commands::Visuals => {
            for (i, name) in VISUALS.iter().enumerate() {
                println!("{:>2}  {}", i, name);
            }
            Ok(())
        }
        Commands::Text {
            action: TextCommand::List,
        } => {
            let texts = store.load_list(TEXTS_KEY)?.unwrap_or_default();
            for (i, text) in texts.iter().enumerate() {
                println!("{:>2}  {}", i, text);
            }
            Ok(())
        }
        command => run_remote(command, &mut settings, store, cli.device).await,
    }
}

#[cfg(feature = "ble")]
async fn run_remote(
    command: Commands,
    settings: &mut SettingsService,
    store: JsonFileStore,
    device: Option<String>,
) -> Result<()> {
    use rave_led_remote::infrastructure::bluetooth::BluetoothService;
    use rave_led_remote::LedController;
    use tracing::error;

    let mut bluetooth = BluetoothService::new(settings.get()).await?;

    if let Commands::Scan = command {
        for device in bluetooth.scan().await? {
            println!(
                "{}  {}  rssi={}",
                device.address,
                device.name,
                device
                    .signal_strength
                    .map_or_else(|| "?".to_string(), |r| r.to_string())
            );
        }
        return Ok(());
    }

    let address = device.or_else(|| settings.get().last_peripheral.clone());
    let connected = bluetooth.connect(address.as_deref()).await?;
    println!("Connected to {} ({})", connected.name, connected.address);
    settings.remember_peripheral(&connected.address)?;

    let mut controller = LedController::new(bluetooth.session(), store)?;
    let result = execute(&mut controller, command).await;
    if let Err(e) = &result {
        error!("{}", e.alert_message());
    }
    bluetooth.disconnect().await?;
    Ok(result?)
}

#[cfg(feature = "ble")]
async fn execute(
    controller: &mut rave_led_remote::LedController<JsonFileStore>,
    command: Commands,
) -> Result<(), rave_led_remote::ControllerError> {
    use rave_led_remote::Rgb;

    match command {
        Commands::Sync => {
            controller.sync_now().await?;
        }
        Commands::Brightness { value } => {
            controller.set_brightness(value).await?;
        }
        Commands::Speed { value } => {
            controller.set_speed(value).await?;
        }
        Commands::Repeats { value } => {
            controller.set_repeats(value).await?;
        }
        Commands::Color { r, g, b } => {
            controller.set_color(Rgb::new(r, g, b)).await?;
        }
        Commands::Visual { index } => {
            controller.activate_visual(index).await?;
        }
        Commands::Text { action } => match action {
            TextCommand::Insert { text } => {
                controller.insert_text(&text).await?;
            }
            TextCommand::Delete { text } => {
                controller.delete_text(&text).await?;
            }
            TextCommand::Activate { text } => {
                controller.activate_text(&text).await?;
            }
            TextCommand::Repeats { count } => {
                controller.set_text_repeats(count).await?;
            }
            TextCommand::List => {}
        },
        Commands::Replay => controller.refresh_texts().await?,
        Commands::Scan | Commands::Visuals => {}
    }

    let state = controller.state();
    println!("brightness  {}", state.brightness);
    println!("speed       {}", state.speed);
    println!(
        "repeats     {}",
        state
            .text_repeats
            .map_or_else(|| "-".to_string(), |r| r.to_string())
    );
    println!("color       {}", state.active_color);
    println!("text        {}", state.active_text().unwrap_or("-"));
    println!("visual      {}", state.active_visual().unwrap_or("-"));
    Ok(())
}

#[cfg(not(feature = "ble"))]
async fn run_remote(
    _command: Commands,
    _settings: &mut SettingsService,
    _store: JsonFileStore,
    _device: Option<String>,
) -> Result<()> {
    anyhow::bail!("built without BLE support, rebuild with `--features ble` to talk to a device")
}
