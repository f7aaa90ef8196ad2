/// CPU counter line parsing
use crate::constants::{COUNTER_FIELDS, ENTITY_TAG_PREFIX};
use crate::error::ParseError;

/// Cumulative time units since boot for the aggregate row or one core, as
/// listed in /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CounterSnapshot {
    /// Sum of all eight fields. Counters wrap, so the sum wraps with them.
    pub fn total(&self) -> u64 {
        self.user
            .wrapping_add(self.nice)
            .wrapping_add(self.system)
            .wrapping_add(self.idle)
            .wrapping_add(self.iowait)
            .wrapping_add(self.irq)
            .wrapping_add(self.softirq)
            .wrapping_add(self.steal)
    }

    /// Idle plus iowait.
    pub fn idle_total(&self) -> u64 {
        self.idle.wrapping_add(self.iowait)
    }

    fn from_fields(fields: [u64; COUNTER_FIELDS]) -> Self {
        let [user, nice, system, idle, iowait, irq, softirq, steal] = fields;
        CounterSnapshot {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        }
    }
}

/// Check whether a line is an aggregate row ("cpu ") or a per-core row
/// ("cpu" immediately followed by a digit).
pub fn is_entity_line(line: &str) -> bool {
    match line.strip_prefix(ENTITY_TAG_PREFIX) {
        Some(rest) => rest
            .bytes()
            .next()
            .is_some_and(|b| b == b' ' || b == b'\t' || b.is_ascii_digit()),
        None => false,
    }
}

/// Parse one counter line: a tag token followed by at least eight unsigned
/// integers. Anything after the eighth integer is ignored.
pub fn parse_counter_line(line: &str) -> Result<CounterSnapshot, ParseError> {
    let mut tokens = line.split_ascii_whitespace();
    if tokens.next().is_none() {
        return Err(ParseError::MalformedLine {
            reason: "empty line".to_string(),
        });
    }

    let mut fields = [0u64; COUNTER_FIELDS];
    for (idx, slot) in fields.iter_mut().enumerate() {
        let token = tokens.next().ok_or_else(|| ParseError::MalformedLine {
            reason: format!("expected {COUNTER_FIELDS} counters, found {idx}"),
        })?;
        *slot = token.parse::<u64>().map_err(|err| ParseError::MalformedLine {
            reason: format!("counter {idx} '{token}': {err}"),
        })?;
    }

    Ok(CounterSnapshot::from_fields(fields))
}
