//! Background poll loop, command draining and watchdog supervision.
//!
//! The [`SappPoller`] owns the session, register cache and write queue,
//! and runs one dedicated background thread that repeats, in strict order:
//!
//! 1. check transport liveness (a dead transport signals "offline" and
//!    stops the loop),
//! 2. refresh all three register banks and recompute item diffs,
//! 3. notify changed items through the change callback,
//! 4. drain the write queue in FIFO order,
//! 5. sleep for the poll interval.
//!
//! A separate watchdog thread on its own short period restarts the loop
//! if its backing thread terminated while the poller is still supposed to
//! be running, so an unhandled fault inside one iteration never silently
//! stops polling.
//!
//! Stopping is cooperative: it takes effect at the next state check, never
//! mid I/O call. Disposal is terminal, idempotent, and closes the
//! transport; an in-flight iteration observes the disposed flag and exits
//! before its next sub-step.
//!
//! # Example
//!
//! ```no_run
//! use picnet_sapp::{BankKind, DigitalItem, PollerConfig, SappItem, SappPoller};
//!
//! let config = PollerConfig::new("192.168.1.100");
//! let poller = SappPoller::connect(config)?;
//! poller.subscribe_item("kitchen-light", SappItem::Digital(
//!     DigitalItem::new(BankKind::Output, 10, 3),
//! ));
//! poller.on_offline(|| eprintln!("MAS went offline"));
//! poller.start();
//! // ... external producers:
//! poller.enqueue_write(120, 1);
//! # Ok::<(), picnet_sapp::SappError>(())
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::cache::{BankKind, RegisterCache};
use crate::error::Result;
use crate::items::{ItemValue, SappItem};
use crate::queue::CommandQueue;
use crate::session::Sapp;
use crate::transport::{DEFAULT_MAS_PORT, DEFAULT_TIMEOUT};

/// Lifecycle state of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollerState {
    /// The loop is (or should be) polling.
    Running = 0,
    /// The loop has been told to stop, or stopped itself on a dead
    /// transport. It can be started again.
    Stopped = 1,
    /// Terminal: the loop and watchdog are torn down and the transport is
    /// closed.
    Disposed = 2,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopped,
            _ => Self::Disposed,
        }
    }
}

/// Configuration for a [`SappPoller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// MAS hostname or address.
    pub host: String,
    /// MAS TCP port.
    pub port: u16,
    /// Per-byte response timeout.
    pub timeout: Duration,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// How often the watchdog checks the loop thread.
    pub watchdog_period: Duration,
    /// Delay before the watchdog resubmits a dead loop.
    pub restart_delay: Duration,
}

impl PollerConfig {
    /// Creates a configuration with defaults for everything but the host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MAS_PORT,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_millis(100),
            watchdog_period: Duration::from_secs(1),
            restart_delay: Duration::from_millis(50),
        }
    }

    /// Sets a custom MAS port (default 7001).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets a custom response timeout (default 5 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets a custom poll interval (default 100 ms).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets a custom watchdog period (default 1 second).
    pub fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }
}

type OfflineCallback = Box<dyn Fn() + Send + Sync>;
type ChangeCallback = Box<dyn Fn(&str, ItemValue) + Send + Sync>;

/// State shared between the engine handle, the loop and the watchdog.
struct Shared {
    session: Mutex<Sapp>,
    cache: Mutex<RegisterCache>,
    queue: CommandQueue,
    state: AtomicU8,
    poll_interval: Duration,
    on_offline: Mutex<Option<OfflineCallback>>,
    on_change: Mutex<Option<ChangeCallback>>,
}

impl Shared {
    fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: PollerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// The poll engine: session + cache + queue + background loop + watchdog.
pub struct SappPoller {
    shared: Arc<Shared>,
    job: Arc<Mutex<Option<JoinHandle<()>>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    watchdog_period: Duration,
    restart_delay: Duration,
}

impl SappPoller {
    /// Connects a session to the configured MAS and builds the poller
    /// around it. The loop does not run until [`start`](Self::start).
    pub fn connect(config: PollerConfig) -> Result<Self> {
        let session = Sapp::connect(config.host.clone(), config.port, config.timeout)?;
        Ok(Self::with_session(session, config))
    }

    /// Builds the poller around an existing session.
    pub fn with_session(session: Sapp, config: PollerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                cache: Mutex::new(RegisterCache::new()),
                queue: CommandQueue::new(),
                state: AtomicU8::new(PollerState::Stopped as u8),
                poll_interval: config.poll_interval,
                on_offline: Mutex::new(None),
                on_change: Mutex::new(None),
            }),
            job: Arc::new(Mutex::new(None)),
            watchdog: Mutex::new(None),
            watchdog_period: config.watchdog_period,
            restart_delay: config.restart_delay,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> PollerState {
        self.shared.state()
    }

    /// Adds a bare address to a bank's watched set.
    pub fn subscribe_address(&self, bank: BankKind, addr: u16) {
        lock(&self.shared.cache).watch(bank, addr);
    }

    /// Registers an item; its read address is watched automatically.
    pub fn subscribe_item(&self, id: impl Into<String>, item: SappItem) {
        lock(&self.shared.cache).add_item(id, item);
    }

    /// Queues a virtual-variable write; the next poll cycle dispatches it.
    pub fn enqueue_write(&self, address: u16, value: u16) {
        self.shared.queue.push(address, value);
    }

    /// Returns the number of writes still awaiting confirmation.
    pub fn pending_writes(&self) -> usize {
        self.shared.queue.len()
    }

    /// Returns an item's current value.
    pub fn item_value(&self, id: &str) -> Option<ItemValue> {
        lock(&self.shared.cache).item_value(id)
    }

    /// Returns whether an item changed since its value was last taken.
    pub fn item_changed(&self, id: &str) -> bool {
        lock(&self.shared.cache).item_changed(id)
    }

    /// Sets the callback invoked when the transport becomes unreachable.
    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.shared.on_offline) = Some(Box::new(callback));
    }

    /// Sets the callback invoked for each changed item, after bank
    /// refresh and before queue draining.
    pub fn on_change(&self, callback: impl Fn(&str, ItemValue) + Send + Sync + 'static) {
        *lock(&self.shared.on_change) = Some(Box::new(callback));
    }

    /// Starts (or restarts) the poll loop and its watchdog.
    ///
    /// Has no effect on a disposed poller.
    pub fn start(&self) {
        if self.shared.state() == PollerState::Disposed {
            warn!("start ignored: poller is disposed");
            return;
        }
        self.shared.set_state(PollerState::Running);

        let mut job = lock(&self.job);
        if job.as_ref().map_or(true, JoinHandle::is_finished) {
            let shared = Arc::clone(&self.shared);
            *job = Some(thread::spawn(move || run_loop(&shared)));
        }
        drop(job);

        let mut watchdog = lock(&self.watchdog);
        if watchdog.as_ref().map_or(true, JoinHandle::is_finished) {
            let shared = Arc::clone(&self.shared);
            let job = Arc::clone(&self.job);
            let period = self.watchdog_period;
            let delay = self.restart_delay;
            *watchdog = Some(thread::spawn(move || run_watchdog(&shared, &job, period, delay)));
        }
    }

    /// Asks the loop to stop at its next state check. The poller can be
    /// started again afterwards.
    pub fn stop(&self) {
        if self.shared.state() != PollerState::Disposed {
            self.shared.set_state(PollerState::Stopped);
        }
    }

    /// Clears all items and queued writes and resets the banks, keeping
    /// the connection. Used on device reconfiguration.
    pub fn purge(&self) {
        lock(&self.shared.cache).purge();
        self.shared.queue.clear();
    }

    /// Tears everything down: stops the loop, cancels the watchdog and
    /// closes the transport. Terminal, idempotent, and safe to call
    /// concurrently with a mid-flight iteration.
    pub fn dispose(&self) {
        self.shared.set_state(PollerState::Disposed);

        if let Some(handle) = lock(&self.watchdog).take() {
            let _ = handle.join();
        }
        if let Some(handle) = lock(&self.job).take() {
            let _ = handle.join();
        }
        lock(&self.shared.session).close();
        debug!("poller disposed");
    }
}

impl Drop for SappPoller {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// One full poll cycle. Returns `false` when the loop should exit.
fn poll_cycle(shared: &Shared) -> bool {
    let mut session = lock(&shared.session);

    if session.is_dead() {
        warn!("transport unreachable, stopping poller");
        shared.set_state(PollerState::Stopped);
        drop(session);
        if let Some(callback) = lock(&shared.on_offline).as_ref() {
            callback();
        }
        return false;
    }

    // Bank refresh strictly precedes diff computation, which precedes
    // change notification, which precedes queue draining.
    let changed = {
        let mut cache = lock(&shared.cache);
        cache.refresh_all(&mut session);
        cache.take_changed()
    };

    if !changed.is_empty() {
        if let Some(callback) = lock(&shared.on_change).as_ref() {
            for (id, value) in changed {
                callback(&id, value);
            }
        }
    }

    if shared.state() != PollerState::Running {
        return false;
    }

    shared
        .queue
        .drain_with(|address, value| session.write_virtual(address, value));
    true
}

fn run_loop(shared: &Shared) {
    debug!("poll loop started");
    while shared.state() == PollerState::Running {
        if !poll_cycle(shared) {
            break;
        }
        thread::sleep(shared.poll_interval);
    }
    debug!("poll loop exited");
}

/// Restarts the loop thread if it died while the poller should be running.
fn run_watchdog(
    shared: &Arc<Shared>,
    job: &Arc<Mutex<Option<JoinHandle<()>>>>,
    period: Duration,
    delay: Duration,
) {
    loop {
        match shared.state() {
            PollerState::Disposed => return,
            PollerState::Running => {
                let dead = lock(job).as_ref().map_or(true, JoinHandle::is_finished);
                if dead {
                    error!("poll loop terminated unexpectedly, resubmitting");
                    thread::sleep(delay);
                    if shared.state() == PollerState::Running {
                        let mut slot = lock(job);
                        if let Some(handle) = slot.take() {
                            let _ = handle.join();
                        }
                        let shared = Arc::clone(shared);
                        *slot = Some(thread::spawn(move || run_loop(&shared)));
                    }
                }
            }
            PollerState::Stopped => {}
        }
        thread::sleep(period);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{checksum, ACK, ETX, STX};
    use crate::items::DigitalItem;
    use crate::transport::SappTransport;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;

    fn make_frame(status: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![ACK, STX, status];
        frame.extend_from_slice(payload);
        frame.push(ETX);
        let sum = checksum(payload).wrapping_add(u16::from(status));
        frame.push((sum >> 8) as u8);
        frame.push((sum & 0xFF) as u8);
        frame
    }

    fn test_config(port: u16) -> PollerConfig {
        PollerConfig::new("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(10))
            .with_watchdog_period(Duration::from_millis(20))
    }

    /// A minimal scripted MAS: answers every request by opcode until the
    /// connection closes. Records write payloads on the channel.
    fn spawn_mas(listener: TcpListener, writes: mpsc::Sender<Vec<u8>>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            let (mut socket, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let mut buf = [0u8; 64];
            loop {
                let n = match socket.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let opcode = buf[1];
                let response: &[u8] = match opcode {
                    0x74 | 0x75 | 0x7C => b"0004", // full reads: bit 3 set
                    0x7D => {
                        let _ = writes.send(buf[2..n - 3].to_vec());
                        b""
                    }
                    0x80 => b"010004",   // changed outputs: addr 1 -> 4
                    0x81 => b"010004",   // changed inputs: addr 1 -> 4
                    0x82 => b"00010004", // changed virtuals: addr 1 -> 4
                    _ => b"",
                };
                if socket.write_all(&make_frame(0x00, response)).is_err() {
                    break;
                }
            }
        })
    }

    fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_dead_transport_goes_offline() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = SappTransport::new("127.0.0.1", port, Duration::from_millis(50));
        let _ = transport.connect(); // exhausts the budget, marks unreachable
        let session = Sapp::with_transport(transport);

        let poller = SappPoller::with_session(session, test_config(port));
        let offline = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&offline);
        poller.on_offline(move || flag.store(true, Ordering::SeqCst));

        poller.start();
        assert!(wait_until(Duration::from_secs(2), || {
            poller.state() == PollerState::Stopped
        }));
        assert!(offline.load(Ordering::SeqCst));

        poller.dispose();
        assert_eq!(poller.state(), PollerState::Disposed);
    }

    #[test]
    fn test_poll_cycle_updates_items_and_drains_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (writes_tx, writes_rx) = mpsc::channel();
        let server = spawn_mas(listener, writes_tx);

        let poller = SappPoller::connect(test_config(port)).unwrap();
        poller.subscribe_item(
            "light",
            SappItem::Digital(DigitalItem::new(BankKind::Input, 1, 3)),
        );
        // A bare watched address alongside the item subscription.
        poller.subscribe_address(BankKind::Output, 2);

        let (change_tx, change_rx) = mpsc::channel();
        poller.on_change(move |id, value| {
            let _ = change_tx.send((id.to_string(), value));
        });

        poller.start();

        // First cycle reads input 1 = 4, bit 3 set -> item flips to true.
        let (id, value) = change_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(id, "light");
        assert_eq!(value, ItemValue::Digital(true));
        assert_eq!(poller.item_value("light"), Some(ItemValue::Digital(true)));

        // Queued write goes out on a later cycle, in hex-ASCII form.
        poller.enqueue_write(100, 7);
        let payload = writes_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(payload, b"00640007".to_vec());
        assert!(wait_until(Duration::from_secs(2), || {
            poller.pending_writes() == 0
        }));

        poller.dispose();
        assert_eq!(poller.state(), PollerState::Disposed);
        drop(server);
    }

    #[test]
    fn test_stop_and_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (writes_tx, _writes_rx) = mpsc::channel();
        let server = spawn_mas(listener, writes_tx);

        let poller = SappPoller::connect(test_config(port)).unwrap();
        poller.start();
        assert_eq!(poller.state(), PollerState::Running);

        poller.stop();
        assert!(wait_until(Duration::from_secs(2), || {
            lock(&poller.job).as_ref().map_or(true, JoinHandle::is_finished)
        }));
        assert_eq!(poller.state(), PollerState::Stopped);

        // A stopped poller may be started again.
        poller.start();
        assert_eq!(poller.state(), PollerState::Running);

        poller.dispose();
        drop(server);
    }

    #[test]
    fn test_watchdog_respawns_after_callback_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        // The watched input toggles on every differential read, so every
        // cycle produces a change notification.
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut toggle = 0u8;
            let mut buf = [0u8; 64];
            loop {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let response: Vec<u8> = match buf[1] {
                    0x74 | 0x75 | 0x7C => b"0000".to_vec(),
                    0x81 => {
                        toggle ^= 1;
                        format!("01000{toggle}").into_bytes()
                    }
                    0x80 => b"010004".to_vec(),
                    0x82 => b"00010004".to_vec(),
                    _ => Vec::new(),
                };
                if socket.write_all(&make_frame(0x00, &response)).is_err() {
                    break;
                }
            }
        });

        let poller = SappPoller::connect(test_config(port)).unwrap();
        poller.subscribe_item(
            "contact",
            SappItem::Digital(DigitalItem::new(BankKind::Input, 1, 1)),
        );

        // The first notification kills the loop thread outright.
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        poller.on_change(move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated handler fault");
            }
        });

        poller.start();

        // The watchdog must resubmit the dead loop and notifications must
        // keep arriving afterwards.
        assert!(wait_until(Duration::from_secs(5), || {
            calls.load(Ordering::SeqCst) >= 3
        }));
        assert_eq!(poller.state(), PollerState::Running);

        poller.dispose();
        drop(server);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = SappTransport::new("127.0.0.1", port, Duration::from_millis(50));
        let poller = SappPoller::with_session(Sapp::with_transport(transport), test_config(port));

        poller.dispose();
        poller.dispose();
        assert_eq!(poller.state(), PollerState::Disposed);

        // start after dispose is a no-op.
        poller.start();
        assert_eq!(poller.state(), PollerState::Disposed);
    }

    #[test]
    fn test_purge_clears_items_and_queue() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = SappTransport::new("127.0.0.1", port, Duration::from_millis(50));
        let poller = SappPoller::with_session(Sapp::with_transport(transport), test_config(port));

        poller.subscribe_item(
            "x",
            SappItem::Digital(DigitalItem::new(BankKind::Input, 1, 1)),
        );
        poller.enqueue_write(1, 1);
        poller.purge();

        assert!(poller.item_value("x").is_none());
        assert_eq!(poller.pending_writes(), 0);
    }
}
