//! Drives a session from a tokio event loop.

use super::error::{ErrorKind, Result};
use super::session::Session;
use log::{debug, error, info, warn};
use std::future::Future;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Longest pause between passes while receives keep failing.
const MAX_BACKOFF: Duration = Duration::from_millis(1024);

/// Something that exposes one readiness descriptor and handles pending
/// work in single non-blocking steps.
pub trait EventSource {
    /// Descriptor to wait on for readability.
    fn fd(&self) -> Result<RawFd>;
    /// Handles at most one pending item; `NoDataAvailable` when idle.
    fn pump(&mut self) -> Result<()>;
    /// Whether the source will never produce work again.
    fn exited(&self) -> bool;
}

impl EventSource for Session {
    fn fd(&self) -> Result<RawFd> {
        Session::fd(self)
    }

    fn pump(&mut self) -> Result<()> {
        Session::pump(self)
    }

    fn exited(&self) -> bool {
        Session::exited(self)
    }
}

// AsyncFd wants ownership of something AsRawFd; the session keeps the fd.
struct Borrowed(RawFd);

impl AsRawFd for Borrowed {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Pumps `source` whenever its descriptor becomes readable, until
/// `shutdown` resolves or the source exits.
///
/// Transport errors are logged and do not stop the loop. Consecutive
/// failures pause the loop for 1 ms, doubling up to [`MAX_BACKOFF`].
pub async fn drive<S, F>(source: &mut S, shutdown: F) -> Result<()>
where
    S: EventSource,
    F: Future,
{
    let fd = source.fd()?;
    let async_fd = AsyncFd::with_interest(Borrowed(fd), Interest::READABLE).map_err(|e| {
        error!("Cannot register fd {} with the event loop: {}", fd, e);
        ErrorKind::DescriptorUnavailable
    })?;
    tokio::pin!(shutdown);
    let mut failures: u32 = 0;

    loop {
        if source.exited() {
            info!("Session exited, stopping event loop");
            return Ok(());
        }
        if failures > 0 {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping event loop");
                    return Ok(());
                }
                _ = tokio::time::sleep(backoff(failures)) => {}
            }
        }
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping event loop");
                return Ok(());
            }
            ready = async_fd.readable() => {
                let mut guard = ready.map_err(|e| {
                    error!("Waiting on fd {} failed: {}", fd, e);
                    ErrorKind::ReceiveFailed(e.raw_os_error().unwrap_or(libc::EIO))
                })?;
                let (handled, failure) = drain(source);
                debug!("Handled {} request(s)", handled);
                match failure {
                    None => {
                        failures = 0;
                        guard.clear_ready();
                    }
                    // Readiness stays set: the descriptor may still hold data.
                    Some(e) => {
                        failures = if handled > 0 { 1 } else { failures.saturating_add(1) };
                        if failures == 1 {
                            warn!("{}", e);
                        } else {
                            debug!("{} ({} failures in a row)", e, failures);
                        }
                    }
                }
            }
        }
    }
}

fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(10);
    Duration::from_millis(1 << exponent).min(MAX_BACKOFF)
}

// Returns how many items were handled, and the error that stopped the pass
// if the source did not simply go idle.
fn drain<S: EventSource>(source: &mut S) -> (usize, Option<ErrorKind>) {
    let mut handled = 0;
    loop {
        match source.pump() {
            Ok(()) => handled += 1,
            Err(ErrorKind::NoDataAvailable) => return (handled, None),
            Err(e) => return (handled, Some(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::session::set_nonblocking;
    use anyhow::Result;
    use nix::errno::Errno;
    use nix::unistd::{close, pipe, read, write};
    use std::cell::Cell;
    use std::rc::Rc;

    // One request per byte written into a pipe.
    struct PipeSource {
        read: RawFd,
        handled: Rc<Cell<usize>>,
        exited: bool,
        fail_next: bool,
        always_fail: bool,
        attempts: usize,
    }

    impl EventSource for PipeSource {
        fn fd(&self) -> super::Result<RawFd> {
            Ok(self.read)
        }

        fn pump(&mut self) -> super::Result<()> {
            self.attempts += 1;
            if self.always_fail {
                return Err(ErrorKind::ReceiveFailed(libc::ENOMEM));
            }
            if self.fail_next {
                self.fail_next = false;
                return Err(ErrorKind::ReceiveFailed(libc::EPROTO));
            }
            let mut byte = [0u8; 1];
            match read(self.read, &mut byte) {
                Ok(1) => {
                    self.handled.set(self.handled.get() + 1);
                    Ok(())
                }
                Ok(_) | Err(Errno::EAGAIN) => Err(ErrorKind::NoDataAvailable),
                Err(e) => Err(ErrorKind::ReceiveFailed(e as i32)),
            }
        }

        fn exited(&self) -> bool {
            self.exited
        }
    }

    fn pipe_source() -> Result<(PipeSource, RawFd)> {
        let (read, write) = pipe()?;
        set_nonblocking(read)?;
        let source = PipeSource {
            read,
            handled: Rc::new(Cell::new(0)),
            exited: false,
            fail_next: false,
            always_fail: false,
            attempts: 0,
        };
        Ok((source, write))
    }

    async fn until(counter: Rc<Cell<usize>>, target: usize) {
        while counter.get() < target {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_pumps_until_drained() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        write(tx, b"abc")?;
        let handled = source.handled.clone();
        drive(&mut source, until(handled.clone(), 3)).await?;
        assert_eq!(handled.get(), 3);
        close(source.read)?;
        close(tx)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_receive_failure_does_not_stop_loop() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        source.fail_next = true;
        write(tx, b"x")?;
        write(tx, b"y")?;
        let handled = source.handled.clone();
        drive(&mut source, until(handled.clone(), 2)).await?;
        assert_eq!(handled.get(), 2);
        close(source.read)?;
        close(tx)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_exited_source_returns_immediately() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        source.exited = true;
        drive(&mut source, std::future::pending::<()>()).await?;
        assert_eq!(source.handled.get(), 0);
        close(source.read)?;
        close(tx)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_without_traffic() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        drive(&mut source, async {}).await?;
        assert_eq!(source.handled.get(), 0);
        close(source.read)?;
        close(tx)?;
        Ok(())
    }

    #[test]
    fn test_drain_counts_until_idle() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        write(tx, b"12345")?;
        assert_eq!(drain(&mut source), (5, None));
        assert_eq!(drain(&mut source), (0, None));
        source.fail_next = true;
        write(tx, b"6")?;
        assert_eq!(drain(&mut source), (0, Some(ErrorKind::ReceiveFailed(libc::EPROTO))));
        assert_eq!(drain(&mut source), (1, None));
        close(source.read)?;
        close(tx)?;
        Ok(())
    }

    #[test]
    fn test_backoff_doubles_up_to_limit() {
        assert_eq!(backoff(1), Duration::from_millis(1));
        assert_eq!(backoff(2), Duration::from_millis(2));
        assert_eq!(backoff(5), Duration::from_millis(16));
        assert_eq!(backoff(11), MAX_BACKOFF);
        assert_eq!(backoff(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_persistent_failure_backs_off() -> Result<()> {
        let (mut source, tx) = pipe_source()?;
        source.always_fail = true;
        write(tx, b"x")?;
        drive(&mut source, tokio::time::sleep(Duration::from_millis(100))).await?;
        // 1 + 2 + 4 + 8 + 16 + 32 ms of pauses fit in 100 ms; a busy loop
        // would retry thousands of times.
        assert!(source.attempts >= 2, "attempts: {}", source.attempts);
        assert!(source.attempts <= 10, "attempts: {}", source.attempts);
        close(source.read)?;
        close(tx)?;
        Ok(())
    }
}
