/*!
 * Channel Implementation
 * Bounded CSP channel over a ringbuf circular buffer
 */

use super::types::{ChannelConfig, ChannelError, ChannelStats, SendError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::{traits::*, HeapRb};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct State<T> {
    buffer: HeapRb<T>,
    closed: bool,
    /// Send and receive tickets; a synchronous send completes once `taken`
    /// reaches its ticket
    sent: u64,
    taken: u64,
    waiting_receivers: usize,
    blocked_sends: u64,
    blocked_receives: u64,
    max_buffered: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    /// Signalled on space freed and on every take
    not_full: Condvar,
    capacity: usize,
}

/// Bounded multi-producer multi-consumer FIFO channel
///
/// Capacity 0 is a rendezvous channel: `send` returns only after a
/// receiver has taken the message.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &state.buffer.occupied_len())
            .field("closed", &state.closed)
            .finish()
    }
}

fn wait_on<T>(cv: &Condvar, guard: &mut MutexGuard<'_, State<T>>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => cv.wait_until(guard, deadline).timed_out(),
        None => {
            cv.wait(guard);
            false
        }
    }
}

impl<T> Channel<T> {
    pub fn new(capacity: usize) -> Result<Self, ChannelError> {
        Self::with_config(ChannelConfig { capacity })
    }

    pub fn with_config(config: ChannelConfig) -> Result<Self, ChannelError> {
        config.validate()?;

        // A rendezvous channel still stages the in-flight message in one cell
        let buffer = HeapRb::<T>::new(config.capacity.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer,
                    closed: false,
                    sent: 0,
                    taken: 0,
                    waiting_receivers: 0,
                    blocked_sends: 0,
                    blocked_receives: 0,
                    max_buffered: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity: config.capacity,
            }),
        })
    }

    /// Send, blocking while the channel is full
    pub fn send(&self, message: T) -> Result<(), SendError<T>> {
        self.send_inner(message, None)
    }

    /// Send, blocking at most `timeout`
    pub fn send_timeout(&self, message: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.send_inner(message, Some(Instant::now() + timeout))
    }

    /// Send without blocking
    ///
    /// On a rendezvous channel this succeeds only if a receiver is already
    /// waiting; that receiver takes the message before it can time out.
    pub fn try_send(&self, message: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SendError {
                message,
                error: ChannelError::Closed,
            });
        }
        if state.buffer.is_full() || (self.shared.capacity == 0 && state.waiting_receivers == 0) {
            return Err(SendError {
                message,
                error: ChannelError::Full,
            });
        }
        self.push(&mut state, message)?;
        Ok(())
    }

    fn push(&self, state: &mut State<T>, message: T) -> Result<u64, SendError<T>> {
        if let Err(message) = state.buffer.try_push(message) {
            return Err(SendError {
                message,
                error: ChannelError::Full,
            });
        }
        state.sent += 1;
        state.max_buffered = state.max_buffered.max(state.buffer.occupied_len());
        self.shared.not_empty.notify_one();
        Ok(state.sent)
    }

    fn send_inner(&self, message: T, deadline: Option<Instant>) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock();
        let mut blocked = false;

        loop {
            if state.closed {
                return Err(SendError {
                    message,
                    error: ChannelError::Closed,
                });
            }
            if !state.buffer.is_full() {
                break;
            }
            if !blocked {
                state.blocked_sends += 1;
                blocked = true;
            }
            if wait_on(&self.shared.not_full, &mut state, deadline) && state.buffer.is_full() {
                return Err(SendError {
                    message,
                    error: ChannelError::Timeout,
                });
            }
        }

        let ticket = self.push(&mut state, message)?;
        if self.shared.capacity > 0 {
            return Ok(());
        }

        // Synchronous handoff: wait for a receiver to take this ticket
        loop {
            if state.taken >= ticket {
                return Ok(());
            }
            let error = if state.closed {
                Some(ChannelError::Closed)
            } else if wait_on(&self.shared.not_full, &mut state, deadline) && state.taken < ticket {
                Some(ChannelError::Timeout)
            } else {
                None
            };

            if let Some(error) = error {
                // Ours is the only staged message until it is taken
                return match state.buffer.try_pop() {
                    Some(message) => {
                        state.sent -= 1;
                        self.shared.not_full.notify_all();
                        Err(SendError { message, error })
                    }
                    None => Ok(()),
                };
            }
        }
    }

    /// Receive, blocking while empty
    ///
    /// `None` means end-of-channel: closed and fully drained.
    pub fn receive(&self) -> Option<T> {
        self.receive_inner(None).ok()
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        self.receive_inner(Some(Instant::now() + timeout))
    }

    pub fn try_receive(&self) -> Result<T, ChannelError> {
        let mut state = self.shared.state.lock();
        match self.take(&mut state) {
            Some(message) => Ok(message),
            None if state.closed => Err(ChannelError::Closed),
            None => Err(ChannelError::Empty),
        }
    }

    fn take(&self, state: &mut State<T>) -> Option<T> {
        let message = state.buffer.try_pop()?;
        state.taken += 1;
        if self.shared.capacity == 0 {
            self.shared.not_full.notify_all();
        } else {
            self.shared.not_full.notify_one();
        }
        Some(message)
    }

    fn receive_inner(&self, deadline: Option<Instant>) -> Result<T, ChannelError> {
        let mut state = self.shared.state.lock();
        let mut blocked = false;

        loop {
            if let Some(message) = self.take(&mut state) {
                return Ok(message);
            }
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(ChannelError::Timeout);
            }
            if !blocked {
                state.blocked_receives += 1;
                blocked = true;
            }
            state.waiting_receivers += 1;
            wait_on(&self.shared.not_empty, &mut state, deadline);
            state.waiting_receivers -= 1;
        }
    }

    /// Blocking iterator ending at end-of-channel
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }

    /// Close the channel; idempotent
    ///
    /// Blocked senders fail with `Closed`; receivers drain what is buffered.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(
                capacity = self.shared.capacity,
                sent = state.sent,
                buffered = state.buffer.occupied_len(),
                "Channel closed"
            );
        }
        drop(state);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Buffered messages
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        let state = self.shared.state.lock();
        ChannelStats {
            capacity: self.shared.capacity,
            buffered: state.buffer.occupied_len(),
            sent: state.sent,
            received: state.taken,
            blocked_sends: state.blocked_sends,
            blocked_receives: state.blocked_receives,
            max_buffered: state.max_buffered,
            closed: state.closed,
        }
    }
}

/// Iterator returned by [`Channel::iter`]
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.receive()
    }
}
