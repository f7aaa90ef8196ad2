/// Sample cycle: read, diff, render, send, rotate
use std::io;
use std::mem;
use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::constants::MAX_DATAGRAM_BYTES;
use crate::error::{Error, ReadError};
use crate::payload::Payload;
use crate::table::CounterTable;
use crate::transport::Transport;
use crate::usage::table_usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Payload accepted by the transport
    Sent { bytes: usize, entities: usize },
    /// Payload rendered but the transport rejected it
    SendFailed,
    /// Counter read failed; nothing computed or sent
    Skipped,
}

/// Owns both counter tables, the payload buffer and the transport.
///
/// `previous` holds the last good read. Each tick refills `current`, and on
/// success the two tables swap so the old previous buffer is reused. The
/// transport is `None` once the sampler has shut down.
pub struct Sampler<T> {
    config: Config,
    transport: Option<T>,
    previous: CounterTable,
    current: CounterTable,
    usages: Vec<f64>,
    payload: Payload,
    state: State,
    ticks: u64,
}

impl<T: Transport> Sampler<T> {
    /// Allocate the tables, take the first reading and connect the transport.
    ///
    /// The first read is retried `startup_attempts` times with a fixed delay.
    /// Any failure here is fatal. A cancellation during the retry delay
    /// returns `Error::Cancelled`.
    pub fn start<F>(config: Config, cancel: &CancelToken, connect: F) -> Result<Self, Error>
    where
        F: FnOnce(SocketAddr) -> io::Result<T>,
    {
        let mut state = State::Initializing;
        debug!("sampler state: {state:?}");

        let mut previous =
            CounterTable::with_capacity(config.initial_capacity).map_err(Error::Allocation)?;
        let current =
            CounterTable::with_capacity(config.initial_capacity).map_err(Error::Allocation)?;

        let entities = read_with_retries(&config, &mut previous, cancel)?;
        info!(
            "read {} counter rows from {} ({} cores)",
            entities,
            config.source.display(),
            entities - 1
        );

        let transport = connect(config.destination).map_err(|source| Error::Connect {
            destination: config.destination.to_string(),
            source,
        })?;
        info!(
            "UDP socket connected to {}, sending CPU usage every {} ms",
            config.destination,
            config.interval.as_millis()
        );

        state = State::Running;
        debug!("sampler state: {state:?}");
        Ok(Sampler {
            config,
            transport: Some(transport),
            previous,
            current,
            usages: Vec::new(),
            payload: Payload::new(),
            state,
            ticks: 0,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Rows in the last good reading, aggregate included.
    pub fn entities(&self) -> usize {
        self.previous.len()
    }

    /// Tick until cancelled or `max_ticks` is reached, then shut down.
    ///
    /// Cancellation is only observed when the interval sleep ends, so a tick
    /// that has started always runs to completion. The sampler is
    /// `Terminated` when this returns, whether or not it succeeded.
    ///
    /// # Returns
    /// Number of ticks run
    pub fn run(&mut self, cancel: &CancelToken) -> Result<u64, Error> {
        while self.state == State::Running {
            if cancel.sleep(self.config.interval) {
                info!("cancellation received, shutting down");
                break;
            }

            if let Err(err) = self.tick() {
                self.shutdown();
                return Err(err);
            }

            if self.config.max_ticks.is_some_and(|max| self.ticks >= max) {
                info!("reached {} ticks, shutting down", self.ticks);
                break;
            }
        }
        self.shutdown();
        Ok(self.ticks)
    }

    /// Run one read/compute/send/swap cycle.
    ///
    /// Read failures skip the tick and keep the previous reading. Send
    /// failures are logged and never retried. Only allocation failures are
    /// returned as errors.
    pub fn tick(&mut self) -> Result<TickOutcome, Error> {
        if self.state != State::Running {
            debug!("tick requested in state {:?}, ignoring", self.state);
            return Ok(TickOutcome::Skipped);
        }
        self.ticks += 1;

        match self.current.refill(&self.config.source) {
            Ok(_) => {}
            Err(ReadError::Allocation(err)) => return Err(Error::Allocation(err)),
            Err(err) => {
                warn!("skipping tick {}: {}", self.ticks, err);
                return Ok(TickOutcome::Skipped);
            }
        }

        if self.current.len() != self.previous.len() {
            info!(
                "core count changed from {} to {}; cores without history report 0.0 this tick",
                self.previous.len().saturating_sub(1),
                self.current.len().saturating_sub(1)
            );
        }

        table_usage(&self.previous, &self.current, &mut self.usages).map_err(Error::Allocation)?;
        let rendered = self.payload.render(&self.usages)?;
        debug!("tick {} payload:\n{}", self.ticks, rendered.trim_end());
        if rendered.len() > MAX_DATAGRAM_BYTES {
            warn!(
                "tick {} payload is {} bytes, larger than one UDP datagram",
                self.ticks,
                rendered.len()
            );
        }

        let sent = match self.transport.as_mut() {
            Some(transport) => transport.send(self.payload.as_bytes()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed")),
        };
        let outcome = match sent {
            Ok(bytes) => TickOutcome::Sent {
                bytes,
                entities: self.usages.len(),
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                warn!("send buffer full, dropped tick {} payload", self.ticks);
                TickOutcome::SendFailed
            }
            Err(err) => {
                warn!("failed to send tick {} payload: {}", self.ticks, err);
                TickOutcome::SendFailed
            }
        };

        mem::swap(&mut self.previous, &mut self.current);
        Ok(outcome)
    }

    /// Close the transport and release the table and payload storage.
    fn shutdown(&mut self) {
        if self.state == State::Terminated {
            return;
        }
        self.state = State::ShuttingDown;
        debug!("sampler state: {:?}", self.state);

        drop(self.transport.take());
        self.previous.release();
        self.current.release();
        self.usages = Vec::new();
        self.payload = Payload::new();

        self.state = State::Terminated;
        info!("sampler state: {:?} after {} ticks", self.state, self.ticks);
    }
}

/// First read of the counter source with bounded, fixed-delay retries.
fn read_with_retries(
    config: &Config,
    table: &mut CounterTable,
    cancel: &CancelToken,
) -> Result<usize, Error> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match table.refill(&config.source) {
            Ok(entities) => return Ok(entities),
            Err(ReadError::Allocation(err)) => return Err(Error::Allocation(err)),
            Err(err) => err,
        };

        if attempts >= config.startup_attempts {
            return Err(Error::Startup {
                attempts,
                source: err,
            });
        }
        warn!(
            "startup read {}/{} failed: {}",
            attempts, config.startup_attempts, err
        );
        if cancel.sleep(config.startup_retry_delay) {
            info!("startup cancelled after {attempts} read attempt(s)");
            return Err(Error::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::{stat_source, stat_with_cores};
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"));
            }
            self.sent
                .borrow_mut()
                .push(String::from_utf8(payload.to_vec()).unwrap());
            Ok(payload.len())
        }
    }

    fn config(source: &Path) -> Config {
        Config {
            source: source.to_path_buf(),
            destination: "127.0.0.1:1234".parse().unwrap(),
            interval: Duration::from_millis(1),
            startup_attempts: 3,
            startup_retry_delay: Duration::from_millis(1),
            initial_capacity: 2,
            max_ticks: None,
        }
    }

    fn start(
        source: &Path,
        transport: RecordingTransport,
    ) -> Sampler<RecordingTransport> {
        Sampler::start(config(source), &CancelToken::new(), move |_| Ok(transport)).unwrap()
    }

    fn rewrite(source: &Path, contents: &str) {
        std::fs::write(source, contents).unwrap();
    }

    #[test]
    fn test_aggregate_half_busy() {
        let source = stat_source("cpu  100 0 0 900 0 0 0 0\n");
        let transport = RecordingTransport::default();
        let mut sampler = start(source.path(), transport.clone());
        assert_eq!(sampler.state(), State::Running);

        rewrite(source.path(), "cpu  150 0 0 950 0 0 0 0\n");
        let outcome = sampler.tick().unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Sent {
                bytes: 13,
                entities: 1
            }
        );
        assert_eq!(*transport.sent.borrow(), vec!["Total: 50.0%\n".to_string()]);
    }

    #[test]
    fn test_no_data_skips_tick_and_keeps_previous() {
        let source = stat_source("cpu  100 0 0 900 0 0 0 0\n");
        let transport = RecordingTransport::default();
        let mut sampler = start(source.path(), transport.clone());

        rewrite(source.path(), "intr 1 2 3\nctxt 99\n");
        assert_eq!(sampler.tick().unwrap(), TickOutcome::Skipped);
        assert!(transport.sent.borrow().is_empty());
        assert_eq!(sampler.entities(), 1);

        // Still diffed against the reading taken before the bad tick
        rewrite(source.path(), "cpu  150 0 0 950 0 0 0 0\n");
        sampler.tick().unwrap();
        assert_eq!(*transport.sent.borrow(), vec!["Total: 50.0%\n".to_string()]);
    }

    #[test]
    fn test_missing_source_mid_run_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat");
        rewrite(&path, &stat_with_cores(2, 10));
        let transport = RecordingTransport::default();
        let mut sampler = start(&path, transport.clone());

        std::fs::remove_file(&path).unwrap();
        assert_eq!(sampler.tick().unwrap(), TickOutcome::Skipped);
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_core_count_grows() {
        let source = stat_source(&stat_with_cores(3, 10));
        let transport = RecordingTransport::default();
        let mut sampler = start(source.path(), transport.clone());
        assert_eq!(sampler.entities(), 4);

        rewrite(source.path(), &stat_with_cores(5, 20));
        let outcome = sampler.tick().unwrap();
        assert!(matches!(outcome, TickOutcome::Sent { entities: 6, .. }));
        assert_eq!(sampler.entities(), 6);

        let sent = transport.sent.borrow();
        let lines: Vec<&str> = sent[0].lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "Total: 50.0%");
        assert_eq!(lines.iter().filter(|l| l.starts_with("Core ")).count(), 5);
        assert_eq!(lines[1], "Core 0: 50.0%");
        assert_eq!(lines[3], "Core 2: 50.0%");
        assert_eq!(lines[4], "Core 3: 0.0%");
        assert_eq!(lines[5], "Core 4: 0.0%");
    }

    #[test]
    fn test_core_count_shrinks() {
        let source = stat_source(&stat_with_cores(5, 10));
        let transport = RecordingTransport::default();
        let mut sampler = start(source.path(), transport.clone());

        rewrite(source.path(), &stat_with_cores(1, 20));
        sampler.tick().unwrap();
        assert_eq!(
            *transport.sent.borrow(),
            vec!["Total: 50.0%\nCore 0: 50.0%\n".to_string()]
        );
        assert_eq!(sampler.entities(), 2);
    }

    #[test]
    fn test_send_failure_is_not_fatal() {
        let source = stat_source(&stat_with_cores(1, 10));
        let transport = RecordingTransport {
            fail: true,
            ..Default::default()
        };
        let mut sampler = start(source.path(), transport);

        rewrite(source.path(), &stat_with_cores(3, 20));
        assert_eq!(sampler.tick().unwrap(), TickOutcome::SendFailed);
        // Tables still rotated
        assert_eq!(sampler.entities(), 4);
    }

    #[test]
    fn test_startup_gives_up_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("stat");
        let connected = Rc::new(RefCell::new(false));
        let flag = connected.clone();

        let result = Sampler::start(config(&missing), &CancelToken::new(), move |_| {
            *flag.borrow_mut() = true;
            Ok(RecordingTransport::default())
        });
        match result {
            Err(Error::Startup { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, ReadError::SourceUnavailable { .. }));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(!*connected.borrow());
    }

    #[test]
    fn test_startup_retry_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat");
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            std::fs::write(&writer_path, stat_with_cores(2, 10)).unwrap();
        });

        let mut cfg = config(&path);
        cfg.startup_attempts = 200;
        cfg.startup_retry_delay = Duration::from_millis(10);
        let sampler = Sampler::start(cfg, &CancelToken::new(), |_| {
            Ok(RecordingTransport::default())
        })
        .unwrap();
        writer.join().unwrap();
        assert_eq!(sampler.entities(), 3);
    }

    #[test]
    fn test_connect_failure_is_fatal() {
        let source = stat_source(&stat_with_cores(1, 10));
        let result = Sampler::<RecordingTransport>::start(
            config(source.path()),
            &CancelToken::new(),
            |_| Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no route")),
        );
        assert!(matches!(result, Err(Error::Connect { .. })));
    }

    #[test]
    fn test_run_stops_after_max_ticks() {
        let source = stat_source(&stat_with_cores(2, 10));
        let transport = RecordingTransport::default();
        let mut cfg = config(source.path());
        cfg.max_ticks = Some(3);
        let sent = transport.sent.clone();
        let mut sampler =
            Sampler::start(cfg, &CancelToken::new(), move |_| Ok(transport)).unwrap();

        assert_eq!(sampler.run(&CancelToken::new()).unwrap(), 3);
        assert_eq!(sampler.state(), State::Terminated);
        let sent = sent.borrow();
        assert_eq!(sent.len(), 3);
        // Unchanged counters mean no elapsed time
        assert!(sent
            .iter()
            .all(|p| p == "Total: 0.0%\nCore 0: 0.0%\nCore 1: 0.0%\n"));
    }

    #[test]
    fn test_run_honours_cancellation() {
        let source = stat_source(&stat_with_cores(2, 10));
        let transport = RecordingTransport::default();
        let sent = transport.sent.clone();
        let cancel = CancelToken::new();
        let mut sampler =
            Sampler::start(config(source.path()), &cancel, move |_| Ok(transport)).unwrap();

        cancel.cancel();
        assert_eq!(sampler.run(&cancel).unwrap(), 0);
        assert_eq!(sampler.state(), State::Terminated);
        assert_eq!(sampler.entities(), 0);
        assert!(sent.borrow().is_empty());

        // A terminated sampler neither reads nor sends
        assert_eq!(sampler.tick().unwrap(), TickOutcome::Skipped);
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn test_cancel_during_startup_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir.path().join("stat"));
        cfg.startup_attempts = 1_000;
        cfg.startup_retry_delay = Duration::from_secs(30);

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let result = Sampler::start(cfg, &cancel, |_| Ok(RecordingTransport::default()));
        canceller.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_run_over_udp() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let source = stat_source(&stat_with_cores(1, 10));
        let mut cfg = config(source.path());
        cfg.destination = receiver.local_addr().unwrap();
        cfg.max_ticks = Some(1);

        let mut sampler = Sampler::start(
            cfg,
            &CancelToken::new(),
            crate::transport::UdpTransport::connect,
        )
        .unwrap();
        assert_eq!(sampler.run(&CancelToken::new()).unwrap(), 1);

        let mut buf = [0u8; 256];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"Total: 0.0%\nCore 0: 0.0%\n");
    }
}
