//! Per-core CPU utilization sampler.
//!
//! Each tick re-reads the kernel counter table (`/proc/stat`), diffs it
//! against the previous reading, renders one line per entity and sends the
//! text as a single UDP datagram:
//!
//! ```text
//! Total: 12.5%
//! Core 0: 3.0%
//! Core 1: 22.0%
//! ```

pub mod cancel;
pub mod config;
pub mod constants;
pub mod counters;
pub mod error;
pub mod payload;
pub mod sampler;
pub mod table;
pub mod transport;
pub mod usage;

pub use cancel::CancelToken;
pub use config::{Cli, Config};
pub use error::{Error, ParseError, PayloadError, ReadError};
pub use sampler::{Sampler, State, TickOutcome};
pub use transport::{Transport, UdpTransport};
