//! Timer service: one-shot and repeating timers bound to the plugin
//! that created them, auto-cancelled on unload. Timers never run on
//! their own task: `TimerRegistry::poll` is driven from the bot's
//! single `select!` loop, keeping the whole daemon on one cooperative
//! thread.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{BotError, Result};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerKind {
    Single,
    Repeat,
}

pub struct Timer {
    pub id: u64,
    pub plugin: String,
    pub kind: TimerKind,
    pub interval: Duration,
    next_fire: Instant,
    pub paused: bool,
}

impl Timer {
    fn due(&self, now: Instant) -> bool {
        !self.paused && now >= self.next_fire
    }

    fn reschedule(&mut self, now: Instant) {
        self.next_fire = now + self.interval;
    }
}

/// Owns every live timer. `id`s are monotonically increasing and never
/// reused within one process lifetime.
#[derive(Default)]
pub struct TimerRegistry {
    timers: HashMap<u64, Timer>,
    next_id: u64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        TimerRegistry::default()
    }

    pub fn create(&mut self, plugin: impl Into<String>, kind: TimerKind, interval: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                id,
                plugin: plugin.into(),
                kind,
                interval,
                next_fire: Instant::now() + interval,
                paused: true,
            },
        );
        id
    }

    pub fn start(&mut self, id: u64) -> Result<()> {
        let timer = self.timers.get_mut(&id).ok_or(BotError::InvalidCommand)?;
        timer.paused = false;
        timer.next_fire = Instant::now() + timer.interval;
        Ok(())
    }

    pub fn stop(&mut self, id: u64) -> Result<()> {
        let timer = self.timers.get_mut(&id).ok_or(BotError::InvalidCommand)?;
        timer.paused = true;
        Ok(())
    }

    pub fn restart(&mut self, id: u64) -> Result<()> {
        self.stop(id)?;
        self.start(id)
    }

    /// Removes every timer owned by `plugin` (called on plugin unload).
    pub fn cancel_owned_by(&mut self, plugin: &str) {
        self.timers.retain(|_, t| t.plugin != plugin);
    }

    /// Returns the id and owning plugin of every timer due to fire right
    /// now, rescheduling repeating timers and removing one-shot ones.
    pub fn poll(&mut self) -> Vec<(u64, String)> {
        let now = Instant::now();
        let due: Vec<(u64, String)> = self
            .timers
            .values()
            .filter(|t| t.due(now))
            .map(|t| (t.id, t.plugin.clone()))
            .collect();

        for (id, _) in &due {
            match self.timers.get_mut(id) {
                Some(t) if t.kind == TimerKind::Repeat => t.reschedule(now),
                _ => {
                    self.timers.remove(id);
                }
            }
        }
        due
    }

    /// The shortest time until the next timer fires, for sizing the
    /// bot's `select!` sleep branch. `None` if there are no active timers.
    pub fn next_wakeup(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .values()
            .filter(|t| !t.paused)
            .map(|t| t.next_fire.saturating_duration_since(now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_then_is_gone() {
        let mut timers = TimerRegistry::new();
        let id = timers.create("demo", TimerKind::Single, Duration::from_millis(0));
        timers.start(id).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timers.poll(), vec![(id, "demo".to_string())]);
        assert_eq!(timers.poll(), Vec::new());
    }

    #[test]
    fn repeating_timer_reschedules() {
        let mut timers = TimerRegistry::new();
        let id = timers.create("demo", TimerKind::Repeat, Duration::from_millis(0));
        timers.start(id).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timers.poll(), vec![(id, "demo".to_string())]);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timers.poll(), vec![(id, "demo".to_string())]);
    }

    #[test]
    fn unload_cancels_owned_timers() {
        let mut timers = TimerRegistry::new();
        let id = timers.create("demo", TimerKind::Single, Duration::from_secs(60));
        timers.cancel_owned_by("demo");
        assert!(timers.start(id).is_err());
    }

    #[test]
    fn paused_timer_never_due() {
        let mut timers = TimerRegistry::new();
        let id = timers.create("demo", TimerKind::Single, Duration::from_millis(0));
        let _ = id;
        std::thread::sleep(Duration::from_millis(5));
        assert!(timers.poll().is_empty());
    }
}
