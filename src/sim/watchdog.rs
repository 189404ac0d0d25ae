use std::time::{Duration, Instant};

use crate::sync::{Seat, WorkerId, WorkerState};

/// Liveness monitor for a run. A blocked acquire cannot notice its own
/// deadlock, so the driver feeds this from outside.
///
/// Fires when no cycle completed for `stall_timeout` and every live worker was
/// blocked on two consecutive samples.
pub struct Watchdog {
    stall_timeout: Duration,
    last_total: u64,
    last_progress: Instant,
    suspect: bool,
}

impl Watchdog {
    pub fn new(stall_timeout: Duration, now: Instant) -> Self {
        Self {
            stall_timeout,
            last_total: 0,
            last_progress: now,
            suspect: false,
        }
    }

    /// Feeds one sample: total completed cycles and each worker's state.
    /// Returns true once the ring is judged deadlocked.
    pub fn observe(&mut self, now: Instant, total_completed: u64, states: &[WorkerState]) -> bool {
        if total_completed != self.last_total {
            self.last_total = total_completed;
            self.last_progress = now;
            self.suspect = false;
            return false;
        }
        let mut live = states.iter().filter(|s| **s != WorkerState::Finished).peekable();
        let all_blocked = live.peek().is_some() && live.all(|s| s.is_blocked());
        if !all_blocked {
            self.suspect = false;
            return false;
        }
        let stalled = now.duration_since(self.last_progress) >= self.stall_timeout;
        let fire = stalled && self.suspect;
        self.suspect = true;
        fire
    }

    /// [`Watchdog::observe`], confirmed by a cycle in the wait-for graph. A
    /// stall with no cycle behind it, such as workers pausing between their two
    /// claims next to a finished neighbour, is not a deadlock.
    pub fn check(
        &mut self,
        now: Instant,
        total_completed: u64,
        seats: &[Seat],
        states: &[WorkerState],
        holders: &[Option<WorkerId>],
    ) -> Option<Vec<WorkerId>> {
        if !self.observe(now, total_completed, states) {
            return None;
        }
        wait_cycle(seats, states, holders)
    }
}

/// Finds a cycle in the wait-for graph: worker `w` waits on the worker holding
/// the resource `w` is blocked on. `holders` is a ring snapshot.
pub fn wait_cycle(
    seats: &[Seat],
    states: &[WorkerState],
    holders: &[Option<WorkerId>],
) -> Option<Vec<WorkerId>> {
    let waits_on = |w: WorkerId| -> Option<WorkerId> {
        let wanted = match states[w] {
            WorkerState::Acquiring => seats[w].left,
            WorkerState::HoldingLeft => seats[w].right,
            _ => return None,
        };
        holders[wanted].filter(|&h| h != w && h < seats.len())
    };

    for start in 0..seats.len() {
        let mut path = vec![start];
        let mut cur = start;
        while let Some(next) = waits_on(cur) {
            if let Some(pos) = path.iter().position(|&w| w == next) {
                return Some(path[pos..].to_vec());
            }
            path.push(next);
            cur = next;
        }
    }
    None
}
