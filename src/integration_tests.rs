#[cfg(test)]
mod integration_tests {
    use crate::buffer::BufferPool;
    use crate::cli::{CliApp, Commands};
    use crate::config::{ConfigManager, ControlConfig};
    use crate::control::{PlayerController, PlayerEvent, PlayerObserver};
    use crate::engine::{EngineEvent, EngineProbe, SimulatedEngine, SimulatedEngineConfig};
    use crate::error::{ControlError, ErrorSeverity, MemoryError, PlayerError};
    use crate::logging::ControlEventType;
    use crate::models::{EngineErrorKind, MediaSource, PlaybackRate, PlaybackState, SeekMode};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn fast_engine(name: &str) -> SimulatedEngineConfig {
        SimulatedEngineConfig {
            name: name.to_string(),
            duration_ms: 60_000,
            confirm_delay: Duration::from_millis(5),
            seek_delay: Duration::from_millis(5),
            position_interval: None,
            ..SimulatedEngineConfig::default()
        }
    }

    fn fast_config() -> ControlConfig {
        ControlConfig {
            command_timeout_ms: 2_000,
            prepare_timeout_ms: 2_000,
            position_update_interval_ms: 0,
            ..ControlConfig::default()
        }
    }

    fn build(config: ControlConfig) -> (Arc<PlayerController>, EngineProbe) {
        let engine = SimulatedEngine::new(fast_engine("sim-integration"));
        let probe = engine.probe();
        let controller = PlayerController::with_config(Box::new(engine), config).unwrap();
        (Arc::new(controller), probe)
    }

    fn wait_for_state(controller: &PlayerController, state: PlaybackState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if controller.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Apply a parsed command the way the interactive shell does
    fn apply(controller: &PlayerController, command: Commands) -> Result<(), PlayerError> {
        match command {
            Commands::Open { uri } => controller.set_source(MediaSource::new(uri))?,
            Commands::Prepare => controller.prepare()?,
            Commands::Play => controller.play()?,
            Commands::Pause => controller.pause()?,
            Commands::Stop => controller.stop()?,
            Commands::Reset => controller.reset()?,
            Commands::Seek { position, mode } => {
                let target = CliApp::parse_time(&position)?;
                let mode = match mode {
                    Some(mode) => CliApp::parse_seek_mode(&mode)?,
                    None => SeekMode::default(),
                };
                controller.seek(target.as_millis() as i64, mode)?;
            }
            Commands::Rate { speed } => controller.set_rate(CliApp::parse_rate(&speed)?)?,
            Commands::Volume { level } => controller.set_volume(level as f32 / 100.0)?,
            Commands::Loop { enabled } => controller.set_looping(enabled)?,
            Commands::Status | Commands::Events { .. } | Commands::Demo { .. } => {}
        }
        Ok(())
    }

    #[test]
    fn test_shell_session_drives_controller() {
        let (controller, probe) = build(fast_config());

        let script = [
            "open sim://session",
            "prepare",
            "play",
            "seek 0:12 exact",
            "rate 1.25",
            "volume 40",
            "pause",
            "play",
            "stop",
        ];
        for line in script {
            let command = CliApp::parse_command(line).unwrap();
            apply(&controller, command).unwrap_or_else(|e| panic!("'{}' failed: {}", line, e));
        }

        let status = controller.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.rate, PlaybackRate::X1_25);
        assert!((status.volume - 0.4).abs() < 0.001);
        assert_eq!(probe.call_count("seek"), 1);
        assert_eq!(probe.max_concurrent_calls(), 1);
    }

    #[test]
    fn test_invalid_shell_command_leaves_state_untouched() {
        let (controller, _probe) = build(fast_config());

        let command = CliApp::parse_command("play").unwrap();
        let error = apply(&controller, command).unwrap_err();
        assert_eq!(error.severity(), ErrorSeverity::Info);
        assert!(matches!(
            error,
            PlayerError::Control(ControlError::InvalidState { operation: "play", .. })
        ));
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_config_file_seeds_controller() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        {
            let mut manager = ConfigManager::with_path(path.clone()).unwrap();
            manager.set_volume(0.25).unwrap();
            manager.set_looping(true).unwrap();
            manager.set_command_timeout_ms(1_500).unwrap();
        }

        let manager = ConfigManager::with_path(path).unwrap();
        let config = manager.get_config().clone();
        assert_eq!(config.command_timeout_ms, 1_500);

        let (controller, _probe) = build(config);
        assert!((controller.volume() - 0.25).abs() < f32::EPSILON);
        assert!(controller.is_looping());
    }

    #[test]
    fn test_engine_failure_and_recovery() {
        let (controller, probe) = build(fast_config());
        controller.set_source(MediaSource::new("sim://flaky")).unwrap();
        controller.prepare().unwrap();
        controller.play().unwrap();

        probe.inject(EngineEvent::Error {
            kind: EngineErrorKind::Network,
            code: 7,
        });
        assert!(wait_for_state(&controller, PlaybackState::Error));
        assert_eq!(controller.status().last_error, Some((EngineErrorKind::Network, 7)));

        let error: PlayerError = controller.play().unwrap_err().into();
        assert!(error.is_recoverable());

        controller.reset().unwrap();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert_eq!(controller.status().last_error, None);

        controller.set_source(MediaSource::new("sim://flaky")).unwrap();
        controller.prepare().unwrap();
        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Started);

        let stats = controller.event_statistics();
        assert_eq!(stats.engine_errors, 1);
    }

    #[test]
    fn test_event_history_tracks_commands() {
        let (controller, _probe) = build(fast_config());
        controller.set_source(MediaSource::new("sim://history")).unwrap();
        controller.prepare().unwrap();
        controller.play().unwrap();

        let events = controller.recent_events(100);
        assert!(events
            .iter()
            .any(|event| event.event_type == ControlEventType::CommandIssued
                && event.details.contains("play")));
        assert!(events
            .iter()
            .any(|event| event.event_type == ControlEventType::StateChanged));
        assert!(controller.event_statistics().commands_issued >= 3);

        // Oldest first
        let timestamps: Vec<_> = events.iter().map(|event| event.timestamp).collect();
        assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_release_is_final() {
        let (controller, probe) = build(fast_config());
        controller.set_source(MediaSource::new("sim://final")).unwrap();
        controller.prepare().unwrap();
        controller.play().unwrap();

        controller.release().unwrap();
        assert_eq!(controller.state(), PlaybackState::Released);
        assert!(!probe.is_playing());

        let error: PlayerError = controller.play().unwrap_err().into();
        assert!(!error.is_recoverable());
        assert_eq!(controller.reset(), Err(ControlError::Released));
        assert_eq!(controller.set_looping(true), Err(ControlError::Released));
    }

    struct ChannelObserver {
        tx: tokio::sync::mpsc::UnboundedSender<PlayerEvent>,
    }

    impl PlayerObserver for ChannelObserver {
        fn on_event(&self, event: PlayerEvent) {
            let _ = self.tx.send(event);
        }
    }

    #[tokio::test]
    async fn test_async_caller_with_event_channel() {
        let (controller, _probe) = build(fast_config());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer: Arc<dyn PlayerObserver> = Arc::new(ChannelObserver { tx });
        controller.set_observer(&observer);

        let player = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || {
            player.set_source(MediaSource::new("sim://async"))?;
            player.prepare()?;
            player.play()
        })
        .await
        .unwrap()
        .unwrap();

        let mut transitions = Vec::new();
        while transitions.len() < 4 {
            let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let PlayerEvent::StateChanged { current, .. } = event {
                transitions.push(current);
            }
        }
        assert_eq!(
            transitions,
            vec![
                PlaybackState::Initialized,
                PlaybackState::Preparing,
                PlaybackState::Prepared,
                PlaybackState::Started,
            ]
        );
    }

    #[test]
    fn test_codec_buffers_exchanged_during_playback() {
        let (controller, _probe) = build(fast_config());
        controller.set_source(MediaSource::new("sim://buffers")).unwrap();
        controller.prepare().unwrap();
        controller.play().unwrap();

        let pool = BufferPool::new("input", 4096, 2).unwrap();
        let producer = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut delivered = 0;
                for frame in 0u8..20 {
                    match pool.acquire() {
                        Ok(mut buffer) => {
                            buffer.fill(&[frame; 512]).unwrap();
                            assert_eq!(buffer.len(), 512);
                            buffer.release();
                            delivered += 1;
                        }
                        Err(MemoryError::PoolExhausted { .. }) => {}
                        Err(e) => panic!("unexpected pool error: {}", e),
                    }
                }
                delivered
            })
        };

        // Control traffic keeps flowing while buffers cycle
        controller.seek(30_000, SeekMode::PreviousSync).unwrap();
        controller.pause().unwrap();

        assert_eq!(producer.join().unwrap(), 20);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert!(stats.allocation_count <= 2);

        pool.close();
        assert!(matches!(pool.acquire(), Err(MemoryError::Closed { .. })));
        assert_eq!(controller.state(), PlaybackState::Paused);
    }
}
