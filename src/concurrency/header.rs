//! Identity shared by every primitive

use crate::fatal::fatal;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Lock rank; acquisitions on a thread must be strictly ascending
pub type Rank = u32;

/// Exempt from rank checking
pub const RANK_UNRANKED: Rank = 0;

/// Ranks at or above this are leaf locks: nothing may be taken while one is held
pub const RANK_LEAF: Rank = 0xFF00_0000;

/// Deepest a recursive acquisition may nest
pub const MAX_REC_DEPTH: u32 = 16;

/// Most locks a single thread may hold at once
pub const MAX_LOCKS_PER_THREAD: usize = 2 * MAX_REC_DEPTH as usize;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Kinds of primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Exclusive,
    Recursive,
    ReadWrite,
    Semaphore,
    ConditionVariable,
    Barrier,
    Rank,
}

impl LockKind {
    /// Signature stamped into a live primitive of this kind
    pub const fn signature(self) -> u32 {
        match self {
            LockKind::Exclusive => 0x4C43_5845,
            LockKind::Recursive => 0x4C43_4552,
            LockKind::ReadWrite => 0x4C57_5752,
            LockKind::Semaphore => 0x4D45_5353,
            LockKind::ConditionVariable => 0x5644_4E43,
            LockKind::Barrier => 0x5252_4142,
            LockKind::Rank => 0x4B4E_4152,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LockKind::Exclusive => "exclusive lock",
            LockKind::Recursive => "recursive lock",
            LockKind::ReadWrite => "read-write lock",
            LockKind::Semaphore => "semaphore",
            LockKind::ConditionVariable => "condition variable",
            LockKind::Barrier => "barrier",
            LockKind::Rank => "rank lock",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic snapshot of a primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDump {
    pub kind: LockKind,
    pub name: String,
    pub rank: Rank,
    pub serial: u64,
    pub signature: u32,
    /// Kind-specific state, e.g. "count=1 owner=0x7f.."
    pub state: String,
}

impl fmt::Display for LockDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' rank=0x{:x} serial={} signature=0x{:08x}",
            self.kind, self.name, self.rank, self.serial, self.signature
        )?;
        if !self.state.is_empty() {
            write!(f, " {}", self.state)?;
        }
        Ok(())
    }
}

/// Name, rank, kind signature and serial number of a primitive
#[derive(Debug)]
pub struct LockHeader {
    name: Arc<str>,
    signature: AtomicU32,
    kind: LockKind,
    rank: Rank,
    serial: u64,
}

impl LockHeader {
    pub fn new(kind: LockKind, name: &str, rank: Rank) -> Self {
        Self {
            name: Arc::from(name),
            signature: AtomicU32::new(kind.signature()),
            kind,
            rank,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn signature(&self) -> u32 {
        self.signature.load(Ordering::Acquire)
    }

    pub fn is_live(&self) -> bool {
        self.signature() == self.kind.signature()
    }

    /// Die unless this is a live primitive of `kind`
    #[inline]
    #[track_caller]
    pub fn validate(&self, kind: LockKind) {
        let signature = self.signature();
        if signature != kind.signature() {
            let what = if signature == 0 {
                "use of a destroyed"
            } else {
                "signature mismatch on"
            };
            fatal(Some(self.dump("")), format!("{} {} {}", what, kind, self.name));
        }
    }

    /// Zero the signature; any later use is fatal
    pub(crate) fn mark_destroyed(&self) {
        self.signature.store(0, Ordering::Release);
    }

    pub fn dump(&self, state: impl Into<String>) -> LockDump {
        LockDump {
            kind: self.kind,
            name: self.name.to_string(),
            rank: self.rank,
            serial: self.serial,
            signature: self.signature(),
            state: state.into(),
        }
    }
}

/// Behaviour common to every registered primitive
pub trait LockObject: Send + Sync {
    fn header(&self) -> &LockHeader;

    /// Diagnostic snapshot including kind-specific state
    fn dump(&self) -> LockDump;

    /// Periodic statistics callback
    fn report_stats(&self) {}

    /// Report a fatal misuse of this primitive
    #[track_caller]
    fn die(&self, message: &str) -> ! {
        fatal(Some(self.dump()), format!("{}: {}", message, self.header().name()))
    }
}
