use log::{error, info, warn};
use media_control::cli::{CliApp, Commands, ParseError, StatusDisplay};
use media_control::config::ConfigManager;
use media_control::control::{PlayerController, PlayerEvent, PlayerObserver};
use media_control::engine::{SimulatedEngine, SimulatedEngineConfig};
use media_control::error::{ControlError, ErrorSeverity, PlayerError};
use media_control::logging::ControlLogger;
use media_control::models::{MediaSource, PlaybackState, SeekMode};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Pushes controller events into the interactive loop
struct ChannelObserver {
    tx: UnboundedSender<PlayerEvent>,
}

impl PlayerObserver for ChannelObserver {
    fn on_event(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}

/// Main application controller that owns the player and its configuration
pub struct AppController {
    controller: Arc<PlayerController>,
    config_manager: ConfigManager,
    // Held so the controller's weak reference stays alive
    _observer: Arc<dyn PlayerObserver>,
    events: Option<UnboundedReceiver<PlayerEvent>>,
}

impl AppController {
    /// Create a new application controller
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, PlayerError> {
        // Initialize logging first (default to 'warn' if unspecified)
        if std::env::var("MEDIACTL_LOG_LEVEL").is_err() {
            std::env::set_var("MEDIACTL_LOG_LEVEL", "warn");
        }
        if let Err(e) = ControlLogger::init() {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let config_manager = match config_path {
            Some(path) => ConfigManager::with_path(path)?,
            None => ConfigManager::new()?,
        };
        let config = config_manager.get_config().clone();

        let engine = SimulatedEngine::new(SimulatedEngineConfig {
            duration_ms: config.demo_duration_ms,
            ..SimulatedEngineConfig::default()
        });
        let controller = Arc::new(PlayerController::with_config(Box::new(engine), config)?);

        let (tx, rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn PlayerObserver> = Arc::new(ChannelObserver { tx });
        controller.set_observer(&observer);

        info!(
            "Application controller initialized (engine '{}')",
            controller.engine_name()
        );

        Ok(Self {
            controller,
            config_manager,
            _observer: observer,
            events: Some(rx),
        })
    }

    /// Run a blocking controller call off the async runtime
    async fn call<T, F>(&self, f: F) -> Result<T, PlayerError>
    where
        F: FnOnce(&PlayerController) -> Result<T, ControlError> + Send + 'static,
        T: Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let result = tokio::task::spawn_blocking(move || f(&controller))
            .await
            .map_err(|e| ControlError::InvalidOperation(format!("control task failed: {}", e)))?;
        Ok(result?)
    }

    /// Execute a single command
    pub async fn execute_command(&mut self, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Open { uri } => {
                let source = MediaSource::new(uri.clone());
                self.call(move |player| player.set_source(source)).await?;
                println!("OK: Loaded {}", uri);
            }
            Commands::Prepare => {
                self.call(|player| player.prepare()).await?;
                match self.controller.duration_ms() {
                    Some(duration_ms) => {
                        println!("OK: Prepared ({})", StatusDisplay::format_ms(duration_ms))
                    }
                    None => println!("OK: Prepared"),
                }
            }
            Commands::Play => {
                self.call(|player| player.play()).await?;
                println!("OK: Playing");
            }
            Commands::Pause => {
                self.call(|player| player.pause()).await?;
                println!("OK: Paused");
            }
            Commands::Stop => {
                self.call(|player| player.stop()).await?;
                println!("OK: Stopped");
            }
            Commands::Reset => {
                self.call(|player| player.reset()).await?;
                println!("OK: Reset");
            }
            Commands::Seek { position, mode } => {
                let target = CliApp::parse_time(&position)?;
                let mode = match mode {
                    Some(mode) => CliApp::parse_seek_mode(&mode)?,
                    None => SeekMode::default(),
                };
                let target_ms = target.as_millis() as i64;
                let settled = self.call(move |player| player.seek(target_ms, mode)).await?;
                println!(
                    "Seeked to: {} ({})",
                    StatusDisplay::format_ms(settled),
                    mode.as_str()
                );
            }
            Commands::Rate { speed } => {
                let rate = CliApp::parse_rate(&speed)?;
                self.call(move |player| player.set_rate(rate)).await?;
                println!("OK: Rate {}", rate);
            }
            Commands::Volume { level } => {
                let volume = (level as f32) / 100.0;
                self.call(move |player| player.set_volume(volume)).await?;

                // Save volume to config
                self.config_manager.set_volume(volume)?;

                println!("OK: Volume {}%", level);
            }
            Commands::Loop { enabled } => {
                self.controller.set_looping(enabled)?;
                self.config_manager.set_looping(enabled)?;
                println!("OK: Looping {}", if enabled { "on" } else { "off" });
            }
            Commands::Status => {
                CliApp::display_status(&self.controller.status());
            }
            Commands::Events { count } => {
                let events = self.controller.recent_events(count);
                StatusDisplay::display_events(&events, &self.controller.event_statistics());
            }
            Commands::Demo { uri } => {
                self.run_demo(uri).await?;
            }
        }

        Ok(())
    }

    /// Scripted lifecycle against the simulated engine
    async fn run_demo(&mut self, uri: String) -> Result<(), PlayerError> {
        if self.controller.state() != PlaybackState::Idle {
            self.call(|player| player.reset()).await?;
        }

        println!("Demo: loading {}", uri);
        let source = MediaSource::new(uri);
        self.call(move |player| player.set_source(source)).await?;
        self.call(|player| player.prepare()).await?;
        println!("Demo: {}", StatusDisplay::format_compact_status(&self.controller.status()));

        self.call(|player| player.play()).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let midpoint = self.controller.duration_ms().unwrap_or(0) / 2;
        let settled = self
            .call(move |player| player.seek(midpoint, SeekMode::ClosestSync))
            .await?;
        println!("Demo: seeked to {}", StatusDisplay::format_ms(settled));

        self.call(|player| player.pause()).await?;
        println!("Demo: {}", StatusDisplay::format_compact_status(&self.controller.status()));

        self.call(|player| player.stop()).await?;
        println!("Demo: {}", StatusDisplay::format_compact_status(&self.controller.status()));
        Ok(())
    }

    /// Run interactive mode
    pub async fn run_interactive_mode(&mut self) -> Result<(), PlayerError> {
        println!("mediactl v0.1.0 (engine '{}')", self.controller.engine_name());
        println!("Type 'help' for available commands, 'exit' or 'quit' to quit.");
        println!();

        let mut events = self.events.take().ok_or_else(|| {
            ControlError::InvalidOperation("interactive mode already ran".to_string())
        })?;

        // Set up graceful shutdown handling
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_flag_clone = Arc::clone(&shutdown_flag);
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down gracefully...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        // Blocking stdin reader
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let mut awaiting_input = false;

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            if !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    awaiting_input = false;
                    match line {
                        Some(line) => {
                            if line.is_empty() {
                                continue;
                            }
                            if line == "exit" || line == "quit" {
                                println!("Goodbye!");
                                break;
                            }
                            match CliApp::parse_command(&line) {
                                Ok(command) => {
                                    if let Err(e) = self.execute_command(command).await {
                                        self.handle_error(&e);
                                    }
                                }
                                Err(ParseError::HelpRequested) => CliApp::display_help(),
                                Err(e) => {
                                    eprintln!("Error: {}", e);
                                    println!("Type 'help' for available commands.");
                                }
                            }
                        }
                        None => {
                            // EOF
                            println!();
                            break;
                        }
                    }
                }

                Some(event) = events.recv() => {
                    if let Some(line) = StatusDisplay::format_event(&event) {
                        println!("\r{}", line);
                        awaiting_input = false;
                    }
                }

                // Keeps the shutdown flag responsive
                _ = interval.tick() => {}
            }
        }

        self.shutdown().await
    }

    /// Release the engine and persist settings
    pub async fn shutdown(&mut self) -> Result<(), PlayerError> {
        println!("Shutting down...");

        if let Err(e) = self.save_current_config() {
            eprintln!("Warning: Error saving configuration: {}", e);
        }
        if let Err(e) = self.call(|player| player.release()).await {
            eprintln!("Warning: Error releasing the engine: {}", e);
        }

        println!("Shutdown complete.");
        Ok(())
    }

    fn handle_error(&self, error: &PlayerError) {
        match error.severity() {
            ErrorSeverity::Info => info!("{}", error),
            ErrorSeverity::Warning => warn!("{}", error),
            ErrorSeverity::Error | ErrorSeverity::Critical => error!("{}", error),
        }
        CliApp::display_error(error);
    }

    fn save_current_config(&mut self) -> Result<(), PlayerError> {
        let volume = self.controller.volume();
        let looping = self.controller.is_looping();
        self.config_manager.update_config(|config| {
            config.default_volume = volume;
            config.looping = looping;
        })?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PlayerError> {
    let cli = CliApp::parse();

    let mut app = match AppController::new(cli.config.clone()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(command) => {
            // Single command mode
            let result = app.execute_command(command).await;
            if let Err(e) = app.call(|player| player.release()).await {
                warn!("Release failed: {}", e);
            }
            if let Err(e) = result {
                app.handle_error(&e);
                std::process::exit(1);
            }
        }
        None => {
            if let Err(e) = app.run_interactive_mode().await {
                app.handle_error(&e);
                std::process::exit(1);
            }
        }
    }

    info!("Application shutdown complete");
    Ok(())
}
