//! The frame processing thread.
//!
//! A [`FrameWorker`] runs a handler on a dedicated thread, one frame at a time. Frames submitted
//! while the handler is busy are not queued: only the most recently submitted frame is kept, and
//! processed once the handler becomes available.

use std::{
    io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender, TrySendError};

/// Outcome of [`FrameWorker::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The frame is waiting to be processed.
    Accepted,
    /// The frame replaced an older frame that was still waiting, which has been dropped.
    Replaced,
    /// The worker thread has exited. The frame was dropped.
    Closed,
}

/// A builder object that can be used to configure and spawn a [`FrameWorker`].
#[derive(Clone, Default)]
pub struct FrameWorkerBuilder {
    name: Option<String>,
}

impl FrameWorkerBuilder {
    /// Sets the name of the worker thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns a [`FrameWorker`] thread that uses `handler` to process submitted frames.
    pub fn spawn<I, F>(self, mut handler: F) -> io::Result<FrameWorker<I>>
    where
        I: Send + 'static,
        F: FnMut(I) + Send + 'static,
    {
        // Capacity 1 holds the latest pending frame while the handler is busy.
        let (sender, recv) = crossbeam::channel::bounded(1);
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let thread_recv: Receiver<I> = recv.clone();
        let name = self.name.unwrap_or_else(|| "frame worker".into());
        let handle = builder.spawn(move || {
            log::trace!("'{name}' starting");
            for frame in thread_recv {
                handler(frame);
            }
            log::trace!("'{name}' exiting");
        })?;

        Ok(FrameWorker {
            sender: Some(sender),
            evict: recv,
            handle: Some(handle),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// A handle to a thread processing frames of type `I` with keep-latest backpressure.
///
/// When dropped, the pending frame (if any) is still processed, then the thread is joined. If the
/// thread has panicked, the panic will be forwarded to the thread dropping the `FrameWorker`.
pub struct FrameWorker<I: Send + 'static> {
    sender: Option<Sender<I>>,
    evict: Receiver<I>,
    handle: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl FrameWorker<()> {
    /// Returns a builder that can be used to configure and spawn a [`FrameWorker`].
    #[inline]
    pub fn builder() -> FrameWorkerBuilder {
        FrameWorkerBuilder::default()
    }
}

impl<I: Send + 'static> FrameWorker<I> {
    /// Submits a frame for processing without blocking.
    ///
    /// If another frame is still waiting for the handler, that frame is dropped in favor of
    /// `frame`.
    pub fn submit(&self, frame: I) -> Submission {
        let Some(sender) = &self.sender else {
            return Submission::Closed;
        };
        if self.is_finished() {
            return Submission::Closed;
        }

        let mut frame = frame;
        let mut replaced = false;
        loop {
            match sender.try_send(frame) {
                Ok(()) => {
                    return if replaced {
                        Submission::Replaced
                    } else {
                        Submission::Accepted
                    };
                }
                Err(TrySendError::Full(f)) => {
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("dropping stale frame");
                        replaced = true;
                    }
                    frame = f;
                }
                Err(TrySendError::Disconnected(_)) => return Submission::Closed,
            }
        }
    }

    /// Returns the number of frames dropped because a newer frame was submitted.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns whether the worker thread has exited, which only happens if its handler panicked.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn wait_for_exit(&mut self) {
        // Propagate the handler's panic, if any.
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl<I: Send + 'static> Drop for FrameWorker<I> {
    fn drop(&mut self) {
        // Closing the channel makes the thread exit after draining it.
        drop(self.sender.take());
        self.wait_for_exit();
    }
}
