use crate::error::ControlError;
use crate::models::PlaybackState;
use parking_lot::{Condvar, MutexGuard};
use std::time::Instant;

/// One condition variable per kind of blocking operation, so completing a
/// seek never wakes a caller waiting on stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    Source,
    Prepare,
    Play,
    Pause,
    Seek,
    Stop,
    Rate,
    Volume,
    Reset,
    Release,
}

impl SyncKind {
    pub const COUNT: usize = 10;

    pub const ALL: [SyncKind; SyncKind::COUNT] = [
        SyncKind::Source,
        SyncKind::Prepare,
        SyncKind::Play,
        SyncKind::Pause,
        SyncKind::Seek,
        SyncKind::Stop,
        SyncKind::Rate,
        SyncKind::Volume,
        SyncKind::Reset,
        SyncKind::Release,
    ];

    fn index(&self) -> usize {
        *self as usize
    }

    pub fn operation(&self) -> &'static str {
        match self {
            SyncKind::Source => "set_source",
            SyncKind::Prepare => "prepare",
            SyncKind::Play => "play",
            SyncKind::Pause => "pause",
            SyncKind::Seek => "seek",
            SyncKind::Stop => "stop",
            SyncKind::Rate => "set_rate",
            SyncKind::Volume => "set_volume",
            SyncKind::Reset => "reset",
            SyncKind::Release => "release",
        }
    }

    /// Kinds whose waiters are abandoned when playback is torn down
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncKind::Prepare | SyncKind::Play | SyncKind::Pause | SyncKind::Seek
        )
    }
}

/// What a blocked caller receives on success
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// The state the engine confirmed
    State(PlaybackState),
    /// The position the engine confirmed after a seek
    Position(i64),
    Done,
}

pub type Outcome = Result<Completion, ControlError>;

/// Bookkeeping for one blocked caller
#[derive(Debug)]
pub struct PendingOperation {
    pub ticket: u64,
    pub kind: SyncKind,
    pub expected: Option<PlaybackState>,
    /// Generation of a pending target this caller joined instead of reissuing
    pub joined: Option<u64>,
    pub outcome: Option<Outcome>,
    pub issued_at: Instant,
}

impl PendingOperation {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

/// All pending operations, guarded by the controller's state lock
#[derive(Debug, Default)]
pub struct PendingTable {
    ops: Vec<PendingOperation>,
    next_ticket: u64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: SyncKind, expected: Option<PlaybackState>) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.ops.push(PendingOperation {
            ticket,
            kind,
            expected,
            joined: None,
            outcome: None,
            issued_at: Instant::now(),
        });
        ticket
    }

    /// Register a caller that waits on the target issued under `generation`
    pub fn register_joined(&mut self, kind: SyncKind, expected: Option<PlaybackState>, generation: u64) -> u64 {
        let ticket = self.register(kind, expected);
        self.join(ticket, generation);
        ticket
    }

    /// Attach an open operation to the target issued under `generation`
    pub fn join(&mut self, ticket: u64, generation: u64) -> bool {
        match self.ops.iter_mut().find(|op| op.ticket == ticket) {
            Some(op) if !op.is_complete() => {
                op.joined = Some(generation);
                true
            }
            _ => false,
        }
    }

    /// Complete the caller that issued a target and every caller that joined it
    pub fn complete_target(&mut self, ticket: u64, generation: u64, outcome: Outcome) -> usize {
        self.complete_where(
            |op| op.ticket == ticket || op.joined == Some(generation),
            outcome,
        )
    }

    /// Open operations still waiting on a target
    pub fn waiting_on_target(&self, ticket: u64, generation: u64) -> usize {
        self.ops
            .iter()
            .filter(|op| !op.is_complete() && (op.ticket == ticket || op.joined == Some(generation)))
            .count()
    }

    /// Complete one operation. Returns false if it is gone or already done.
    pub fn complete(&mut self, ticket: u64, outcome: Outcome) -> bool {
        match self.ops.iter_mut().find(|op| op.ticket == ticket) {
            Some(op) if !op.is_complete() => {
                op.outcome = Some(outcome);
                true
            }
            _ => false,
        }
    }

    /// Complete every open operation of `kind` other than `except`
    pub fn complete_kind(&mut self, kind: SyncKind, outcome: Outcome, except: Option<u64>) -> usize {
        self.complete_where(|op| op.kind == kind && Some(op.ticket) != except, outcome)
    }

    /// Complete every open operation other than `except`
    pub fn complete_all(&mut self, outcome: Outcome, except: Option<u64>) -> usize {
        self.complete_where(|op| Some(op.ticket) != except, outcome)
    }

    pub fn complete_where<F>(&mut self, predicate: F, outcome: Outcome) -> usize
    where
        F: Fn(&PendingOperation) -> bool,
    {
        let mut count = 0;
        for op in self.ops.iter_mut().filter(|op| !op.is_complete()) {
            if predicate(op) {
                op.outcome = Some(outcome.clone());
                count += 1;
            }
        }
        count
    }

    /// Remove and return the outcome if the operation has completed
    pub fn take(&mut self, ticket: u64) -> Option<Outcome> {
        let index = self
            .ops
            .iter()
            .position(|op| op.ticket == ticket && op.is_complete())?;
        self.ops.swap_remove(index).outcome
    }

    /// Drop an operation whose caller gave up
    pub fn remove(&mut self, ticket: u64) -> Option<PendingOperation> {
        let index = self.ops.iter().position(|op| op.ticket == ticket)?;
        Some(self.ops.swap_remove(index))
    }

    pub fn open_count(&self, kind: SyncKind) -> usize {
        self.ops
            .iter()
            .filter(|op| op.kind == kind && !op.is_complete())
            .count()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The per-kind condition variables
pub struct SyncPoints {
    conds: [Condvar; SyncKind::COUNT],
}

impl SyncPoints {
    pub fn new() -> Self {
        Self {
            conds: std::array::from_fn(|_| Condvar::new()),
        }
    }

    pub fn notify(&self, kind: SyncKind) {
        self.conds[kind.index()].notify_all();
    }

    pub fn notify_every_kind(&self) {
        for cond in &self.conds {
            cond.notify_all();
        }
    }

    /// Block on `kind` until notified or `deadline`. Returns true on timeout.
    pub fn wait_until<T>(&self, kind: SyncKind, guard: &mut MutexGuard<'_, T>, deadline: Instant) -> bool {
        self.conds[kind.index()].wait_until(guard, deadline).timed_out()
    }
}

impl Default for SyncPoints {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sync_kind_indices_match_all() {
        for (i, kind) in SyncKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_complete_kind_leaves_other_kinds_open() {
        let mut table = PendingTable::new();
        let seek_a = table.register(SyncKind::Seek, None);
        let seek_b = table.register(SyncKind::Seek, None);
        let stop = table.register(SyncKind::Stop, Some(PlaybackState::Stopped));

        let done = table.complete_kind(SyncKind::Seek, Ok(Completion::Position(4_000)), None);
        assert_eq!(done, 2);
        assert_eq!(table.take(seek_a), Some(Ok(Completion::Position(4_000))));
        assert_eq!(table.take(seek_b), Some(Ok(Completion::Position(4_000))));
        assert_eq!(table.take(stop), None);
        assert_eq!(table.open_count(SyncKind::Stop), 1);
    }

    #[test]
    fn test_first_outcome_wins() {
        let mut table = PendingTable::new();
        let ticket = table.register(SyncKind::Play, Some(PlaybackState::Started));

        assert!(table.complete(ticket, Err(ControlError::Canceled { operation: "play" })));
        assert!(!table.complete(ticket, Ok(Completion::State(PlaybackState::Started))));
        assert_eq!(table.complete_all(Err(ControlError::Released), None), 0);
        assert_eq!(
            table.take(ticket),
            Some(Err(ControlError::Canceled { operation: "play" }))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_complete_all_skips_exception() {
        let mut table = PendingTable::new();
        let release = table.register(SyncKind::Release, None);
        let play = table.register(SyncKind::Play, None);

        assert_eq!(table.complete_all(Err(ControlError::Released), Some(release)), 1);
        assert!(table.take(release).is_none());
        assert!(table.take(play).is_some());
        assert!(table.remove(release).is_some());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_joined_callers_follow_their_target() {
        let mut table = PendingTable::new();
        let issuer = table.register(SyncKind::Play, Some(PlaybackState::Started));
        let joined = table.register_joined(SyncKind::Play, Some(PlaybackState::Started), 4);
        let queued = table.register(SyncKind::Play, Some(PlaybackState::Started));
        assert_eq!(table.waiting_on_target(issuer, 4), 2);

        let outcome = Err(ControlError::Canceled { operation: "play" });
        assert_eq!(table.complete_target(issuer, 4, outcome), 2);
        assert!(table.take(issuer).is_some());
        assert!(table.take(joined).is_some());
        assert!(table.take(queued).is_none());
        assert_eq!(table.waiting_on_target(issuer, 4), 0);
        assert_eq!(table.open_count(SyncKind::Play), 1);
    }

    #[test]
    fn test_wait_until_times_out_without_notify() {
        let points = SyncPoints::new();
        let lock = Mutex::new(());
        let mut guard = lock.lock();
        let timed_out = points.wait_until(
            SyncKind::Pause,
            &mut guard,
            Instant::now() + Duration::from_millis(20),
        );
        assert!(timed_out);
    }

    #[test]
    fn test_notify_wakes_matching_kind() {
        let shared = Arc::new((Mutex::new(false), SyncPoints::new()));
        let waiter = Arc::clone(&shared);

        let handle = thread::spawn(move || {
            let (lock, points) = &*waiter;
            let mut ready = lock.lock();
            let deadline = Instant::now() + Duration::from_secs(2);
            while !*ready {
                if points.wait_until(SyncKind::Seek, &mut ready, deadline) {
                    return false;
                }
            }
            true
        });

        thread::sleep(Duration::from_millis(20));
        {
            let (lock, points) = &*shared;
            *lock.lock() = true;
            points.notify(SyncKind::Seek);
        }
        assert!(handle.join().unwrap());
    }
}
