use std::time::Duration;

/// Runs a callback at most once per `period` of simulated time.
///
/// Time only moves when the owner calls [`Periodic::elapse`] (or [`Periodic::tick`]) with the
/// frame delta. A zero period fires on every call. An idle scheduler never fires.
#[derive(Debug, Clone)]
pub struct Periodic<F> {
    callback: Option<F>,
    period: Duration,
    remaining: Duration,
}

impl<F> Periodic<F> {
    pub fn new(callback: F, period: Duration) -> Self {
        Self {
            callback: Some(callback),
            period,
            remaining: period,
        }
    }

    pub fn idle() -> Self {
        Self {
            callback: None,
            period: Duration::ZERO,
            remaining: Duration::ZERO,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.callback.is_none()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn callback(&self) -> Option<&F> {
        self.callback.as_ref()
    }

    /// Advances the timer; true when the callback is due. The timer is reset when it fires.
    pub fn elapse(&mut self, dt: Duration) -> bool {
        if self.callback.is_none() {
            return false;
        }

        self.remaining = self.remaining.saturating_sub(dt);
        if self.remaining.is_zero() {
            self.remaining = self.period;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.remaining = self.period;
    }
}

impl<F: Copy> Periodic<F> {
    /// Elapses `dt` and hands back the callback when it is due, so an owner can call it with
    /// `&mut self` after the borrow of the timer ends.
    pub fn due(&mut self, dt: Duration) -> Option<F> {
        if self.elapse(dt) {
            self.callback
        } else {
            None
        }
    }
}

impl<F: FnMut()> Periodic<F> {
    pub fn tick(&mut self, dt: Duration) -> bool {
        if self.elapse(dt) {
            self.run_now();
            return true;
        }
        false
    }

    pub fn run_now(&mut self) {
        if let Some(callback) = self.callback.as_mut() {
            callback();
        }
    }
}
