//! Background frame acquisition.
//!
//! A worker thread reads frames from the streaming channel and hands the most
//! recent one to the consumer. Frames the consumer did not pick up in time are
//! overwritten.
use std::{
    io::{Read, Write},
    net::{Shutdown, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use visionary_protocol::blob::FrameBlob;

use crate::{
    error::{Error, Result},
    stream::Streaming,
};

#[derive(Default)]
struct Slot {
    latest: Option<FrameBlob>,
    failure: Option<Error>,
    closed: bool,
}

/// Single-frame mailbox between the acquisition thread and the consumer.
#[derive(Default)]
pub(crate) struct FrameSlot {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `frame`, replacing a frame that has not been taken yet.
    pub(crate) fn publish(&self, frame: FrameBlob) {
        let mut slot = self.lock();
        if let Some(dropped) = slot.latest.replace(frame) {
            log::debug!("Dropping unread frame {}", dropped.frame_number());
        }
        self.ready.notify_one();
    }

    /// Records a terminal failure. Frames already stored are still handed out first.
    pub(crate) fn fail(&self, error: Error) {
        let mut slot = self.lock();
        slot.failure = Some(error);
        slot.closed = true;
        self.ready.notify_all();
    }

    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Blocks until a frame is available or the slot is closed.
    pub(crate) fn take(&self) -> Result<FrameBlob> {
        let mut slot = self.lock();
        loop {
            if let Some(frame) = slot.latest.take() {
                return Ok(frame);
            }
            if let Some(error) = slot.failure.take() {
                return Err(error);
            }
            if slot.closed {
                return Err(Error::Disconnected);
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Owns the acquisition thread of one streaming connection.
pub struct Acquisition {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    shutdown: Option<TcpStream>,
    thread: Option<JoinHandle<()>>,
    front: Option<FrameBlob>,
}

impl Acquisition {
    /// Starts acquiring from a TCP streaming connection.
    pub fn start(streaming: Streaming<TcpStream>, max_attempts: u32) -> Result<Acquisition> {
        let shutdown = streaming.shutdown_handle()?;
        Ok(Acquisition::spawn(streaming, max_attempts, Some(shutdown)))
    }

    /// Starts acquiring from any stream.
    ///
    /// Without a `shutdown` handle, [`Acquisition::stop`] waits until the
    /// pending read of the worker returns.
    pub fn spawn<S>(
        streaming: Streaming<S>,
        max_attempts: u32,
        shutdown: Option<TcpStream>,
    ) -> Acquisition
    where
        S: Read + Write + Send + 'static,
    {
        let slot = Arc::new(FrameSlot::default());
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let slot = slot.clone();
            let running = running.clone();
            thread::spawn(move || acquire(streaming, &slot, &running, max_attempts.max(1)))
        };
        Acquisition {
            slot,
            running,
            shutdown,
            thread: Some(thread),
            front: None,
        }
    }

    /// Blocks until a frame is available and returns it.
    ///
    /// The returned frame stays valid until the next call.
    pub fn next_frame(&mut self) -> Result<&FrameBlob> {
        let frame = self.slot.take()?;
        Ok(self.front.insert(frame))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the worker and waits for it to exit. Subsequent calls are no-ops.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(socket) = self.shutdown.take()
            && let Err(err) = socket.shutdown(Shutdown::Both)
        {
            log::debug!("Shutting down streaming socket failed: {}", err);
        }
        self.slot.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acquisition thread panicked");
            } else {
                log::debug!("Acquisition thread joined");
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes the slot when the worker exits, including by unwinding.
struct WorkerExit<'a> {
    slot: &'a FrameSlot,
    running: &'a AtomicBool,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("Acquisition thread panicked");
        }
        self.running.store(false, Ordering::SeqCst);
        self.slot.close();
    }
}

fn acquire<S: Read + Write>(
    mut streaming: Streaming<S>,
    slot: &FrameSlot,
    running: &AtomicBool,
    max_attempts: u32,
) {
    let _exit = WorkerExit { slot, running };
    let mut failures = 0;
    while running.load(Ordering::SeqCst) {
        match streaming.next_frame() {
            Ok(frame) => {
                failures = 0;
                slot.publish(frame);
            }
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                failures += 1;
                log::warn!(
                    "Frame acquisition failed ({}/{}): {}",
                    failures,
                    max_attempts,
                    err
                );
                if failures >= max_attempts {
                    log::error!("Giving up acquisition after {} failed attempts", failures);
                    running.store(false, Ordering::SeqCst);
                    slot.fail(Error::AcquisitionFailed {
                        attempts: failures,
                        last: Box::new(err),
                    });
                    return;
                }
            }
        }
    }
    log::debug!("Acquisition stopped");
}
