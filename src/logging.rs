use crate::models::{EngineErrorKind, PlaybackState};
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Control event kept in the in-memory history
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: ControlEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEventType {
    CommandIssued,
    CommandCompleted,
    CommandCanceled,
    CommandTimedOut,
    CommandRejected,
    StateChanged,
    SeekCoalesced,
    StaleCallback,
    EngineError,
    Released,
}

impl ControlEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlEventType::CommandIssued => "COMMAND_ISSUED",
            ControlEventType::CommandCompleted => "COMMAND_COMPLETED",
            ControlEventType::CommandCanceled => "COMMAND_CANCELED",
            ControlEventType::CommandTimedOut => "COMMAND_TIMED_OUT",
            ControlEventType::CommandRejected => "COMMAND_REJECTED",
            ControlEventType::StateChanged => "STATE_CHANGED",
            ControlEventType::SeekCoalesced => "SEEK_COALESCED",
            ControlEventType::StaleCallback => "STALE_CALLBACK",
            ControlEventType::EngineError => "ENGINE_ERROR",
            ControlEventType::Released => "RELEASED",
        }
    }
}

/// Logger for controller operations and debugging
#[derive(Clone)]
pub struct ControlLogger {
    events: Arc<Mutex<VecDeque<ControlEvent>>>,
    max_events: usize,
}

impl ControlLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: max_events.max(1),
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        // Set log level based on environment variable or default to Info
        let log_level = std::env::var("MEDIACTL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("unnamed"),
                record.args()
            )
        });

        match log_level.to_lowercase().as_str() {
            "trace" => builder.filter_level(log::LevelFilter::Trace),
            "debug" => builder.filter_level(log::LevelFilter::Debug),
            "info" => builder.filter_level(log::LevelFilter::Info),
            "warn" => builder.filter_level(log::LevelFilter::Warn),
            "error" => builder.filter_level(log::LevelFilter::Error),
            _ => builder.filter_level(log::LevelFilter::Info),
        };

        builder.try_init()?;

        info!("Media control logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Log a control event
    pub fn log_event(&self, event_type: ControlEventType, details: String, duration: Option<Duration>) {
        match event_type {
            ControlEventType::CommandIssued | ControlEventType::SeekCoalesced => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            ControlEventType::CommandCompleted => {
                debug!("[{}] {} (took: {:?})", event_type.as_str(), details, duration);
            }
            ControlEventType::StateChanged | ControlEventType::Released => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            ControlEventType::CommandCanceled | ControlEventType::StaleCallback => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            ControlEventType::CommandTimedOut | ControlEventType::CommandRejected => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            ControlEventType::EngineError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
        }

        let event = ControlEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        };

        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_command_issued(&self, operation: &str, state: PlaybackState) {
        self.log_event(
            ControlEventType::CommandIssued,
            format!("{} requested in {}", operation, state),
            None,
        );
    }

    pub fn log_command_completed(&self, operation: &str, elapsed: Duration) {
        self.log_event(
            ControlEventType::CommandCompleted,
            format!("{} completed", operation),
            Some(elapsed),
        );
    }

    pub fn log_command_canceled(&self, operation: &str, reason: &str) {
        self.log_event(
            ControlEventType::CommandCanceled,
            format!("{} canceled: {}", operation, reason),
            None,
        );
    }

    pub fn log_command_timeout(&self, operation: &str, waited: Duration) {
        self.log_event(
            ControlEventType::CommandTimedOut,
            format!("{} not confirmed after {}ms", operation, waited.as_millis()),
            Some(waited),
        );
    }

    pub fn log_command_rejected(&self, operation: &str, reason: &str) {
        self.log_event(
            ControlEventType::CommandRejected,
            format!("{} rejected: {}", operation, reason),
            None,
        );
    }

    pub fn log_state_changed(&self, previous: PlaybackState, current: PlaybackState) {
        self.log_event(
            ControlEventType::StateChanged,
            format!("{} -> {}", previous, current),
            None,
        );
    }

    pub fn log_seek_coalesced(&self, confirmed_ms: i64, latest_ms: i64) {
        self.log_event(
            ControlEventType::SeekCoalesced,
            format!("Seek to {}ms superseded, following up with {}ms", confirmed_ms, latest_ms),
            None,
        );
    }

    pub fn log_stale_callback(&self, details: String) {
        self.log_event(ControlEventType::StaleCallback, details, None);
    }

    pub fn log_engine_error(&self, kind: EngineErrorKind, code: i32) {
        self.log_event(
            ControlEventType::EngineError,
            format!("Engine reported {} error (code {})", kind, code),
            None,
        );
    }

    pub fn log_released(&self, elapsed: Duration) {
        self.log_event(
            ControlEventType::Released,
            "Controller released".to_string(),
            Some(elapsed),
        );
    }

    /// Get recent events for debugging, oldest first
    pub fn get_recent_events(&self, count: usize) -> Vec<ControlEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn get_event_statistics(&self) -> EventStatistics {
        let events = self.events.lock();
        let mut stats = EventStatistics::new();

        for event in events.iter() {
            match event.event_type {
                ControlEventType::CommandIssued => stats.commands_issued += 1,
                ControlEventType::CommandCanceled => stats.cancellations += 1,
                ControlEventType::CommandTimedOut => stats.timeouts += 1,
                ControlEventType::SeekCoalesced => stats.coalesced_seeks += 1,
                ControlEventType::StaleCallback => stats.stale_callbacks += 1,
                ControlEventType::EngineError => stats.engine_errors += 1,
                _ => {}
            }
        }

        stats.total_events = events.len();
        stats
    }
}

impl Default for ControlLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about logged events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub commands_issued: usize,
    pub cancellations: usize,
    pub timeouts: usize,
    pub coalesced_seeks: usize,
    pub stale_callbacks: usize,
    pub engine_errors: usize,
}

impl EventStatistics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        trace!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        duration
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_control_logger_creation() {
        let logger = ControlLogger::new();
        assert_eq!(logger.max_events, 1000);
        assert!(logger.get_recent_events(10).is_empty());
    }

    #[test]
    fn test_log_event() {
        let logger = ControlLogger::new();
        logger.log_event(ControlEventType::CommandIssued, "play requested".to_string(), None);

        let events = logger.get_recent_events(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details, "play requested");
        assert_eq!(events[0].event_type, ControlEventType::CommandIssued);
    }

    #[test]
    fn test_event_history_limit() {
        let logger = ControlLogger::with_capacity(3);
        for i in 0..5 {
            logger.log_event(ControlEventType::StateChanged, format!("Event {}", i), None);
        }

        let events = logger.get_recent_events(10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].details, "Event 2");
        assert_eq!(events[2].details, "Event 4");
    }

    #[test]
    fn test_recent_events_returns_newest_in_order() {
        let logger = ControlLogger::new();
        for i in 0..4 {
            logger.log_event(ControlEventType::CommandIssued, format!("cmd {}", i), None);
        }
        let events = logger.get_recent_events(2);
        assert_eq!(events[0].details, "cmd 2");
        assert_eq!(events[1].details, "cmd 3");
    }

    #[test]
    fn test_event_statistics() {
        let logger = ControlLogger::new();
        logger.log_command_issued("seek", PlaybackState::Started);
        logger.log_command_issued("seek", PlaybackState::Started);
        logger.log_seek_coalesced(1_000, 2_000);
        logger.log_command_timeout("play", Duration::from_millis(50));
        logger.log_engine_error(EngineErrorKind::Decoder, 3);
        logger.log_stale_callback("late STARTED".to_string());

        let stats = logger.get_event_statistics();
        assert_eq!(stats.total_events, 6);
        assert_eq!(stats.commands_issued, 2);
        assert_eq!(stats.coalesced_seeks, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.engine_errors, 1);
        assert_eq!(stats.stale_callbacks, 1);
    }

    #[test]
    fn test_specific_log_methods() {
        let logger = ControlLogger::new();
        logger.log_command_completed("pause", Duration::from_millis(12));
        logger.log_command_canceled("seek", "superseded by stop");
        logger.log_command_rejected("play", "engine status -1");
        logger.log_state_changed(PlaybackState::Prepared, PlaybackState::Started);
        logger.log_released(Duration::from_millis(3));

        let types: Vec<_> = logger
            .get_recent_events(10)
            .iter()
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "COMMAND_COMPLETED",
                "COMMAND_CANCELED",
                "COMMAND_REJECTED",
                "STATE_CHANGED",
                "RELEASED"
            ]
        );
    }

    #[test]
    fn test_clear_events() {
        let logger = ControlLogger::new();
        logger.log_state_changed(PlaybackState::Idle, PlaybackState::Initialized);
        assert_eq!(logger.get_recent_events(10).len(), 1);

        logger.clear_events();
        assert!(logger.get_recent_events(10).is_empty());
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        thread::sleep(Duration::from_millis(10));
        let duration = timer.finish();
        assert!(duration >= Duration::from_millis(10));
    }
}
