// Licensed under the Apache-2.0 license

//! Capabilities shared by the peripheral controllers: logging and the wait
//! policy used by the blocking transfer paths.

use core::fmt;

/// Transfer progress of one controller handle.
///
/// The state field is the single-writer gate between the code that starts a
/// transfer and the interrupt handler that completes it: a start entry point
/// only mutates the handle when the state is `Ready`, and only the interrupt
/// handler moves a busy state back to `Ready`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    Ready,
    BusyTx,
    BusyRx,
}

/// Rejection of a non-blocking start call: another transfer is in flight.
///
/// Carries the state observed at the call, so `Ok` from a start entry point
/// always means the handle was `Ready`. The rejected call has no side
/// effects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Busy(pub TransferState);

/// Logging capability carried by the controllers.
///
/// Controllers log through whatever implementation they are constructed
/// with; [`NoOpLogger`] is the default and compiles to nothing.
pub trait Logger {
    fn log(&mut self, args: fmt::Arguments<'_>);
}

/// Discards everything.
#[derive(Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Routes log lines into any [`embedded_io::Write`] sink, typically a UART.
pub struct WriteLogger<W: embedded_io::Write> {
    sink: W,
}

impl<W: embedded_io::Write> WriteLogger<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn release(self) -> W {
        self.sink
    }
}

impl<W: embedded_io::Write> Logger for WriteLogger<W> {
    fn log(&mut self, args: fmt::Arguments<'_>) {
        let _ = self.sink.write_fmt(args);
        let _ = self.sink.write_all(b"\r\n");
    }
}

/// A flag wait that gave up before the hardware cooperated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Expired;

/// Policy for the busy-wait loops in the blocking transfer paths.
///
/// The polling condition is supplied by the controller; the strategy decides
/// how long to keep evaluating it. This is the seam that lets host tests
/// drive the blocking engines against a register model instead of silicon.
pub trait WaitStrategy {
    /// Polls `ready` until it returns true or the strategy gives up.
    fn wait_until(&mut self, ready: impl FnMut() -> bool) -> Result<(), Expired>;
}

/// Spins until the flag asserts. A wedged bus hangs the caller indefinitely;
/// this matches the stock behavior of the blocking transfer functions.
#[derive(Default)]
pub struct BusyWait;

impl WaitStrategy for BusyWait {
    fn wait_until(&mut self, mut ready: impl FnMut() -> bool) -> Result<(), Expired> {
        while !ready() {}
        Ok(())
    }
}

/// Gives up after a fixed number of polls, turning a stuck flag into a
/// timeout error instead of a hang.
pub struct BoundedWait {
    max_polls: u32,
}

impl BoundedWait {
    pub fn new(max_polls: u32) -> Self {
        Self { max_polls }
    }
}

impl WaitStrategy for BoundedWait {
    fn wait_until(&mut self, mut ready: impl FnMut() -> bool) -> Result<(), Expired> {
        let mut remaining = self.max_polls;
        while !ready() {
            remaining = match remaining.checked_sub(1) {
                Some(n) => n,
                None => return Err(Expired),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_wait_returns_once_ready() {
        let mut polls = 0;
        let result = BusyWait.wait_until(|| {
            polls += 1;
            polls == 5
        });
        assert_eq!(result, Ok(()));
        assert_eq!(polls, 5);
    }

    #[test]
    fn bounded_wait_expires_on_stuck_flag() {
        let mut wait = BoundedWait::new(10);
        assert_eq!(wait.wait_until(|| false), Err(Expired));
    }

    #[test]
    fn bounded_wait_succeeds_before_the_limit() {
        let mut wait = BoundedWait::new(10);
        let mut polls = 0;
        let result = wait.wait_until(|| {
            polls += 1;
            polls == 3
        });
        assert_eq!(result, Ok(()));
    }
}
