//! Debugger breakpoints and memory access watches.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bus::{AccessSize, Address, BusInterceptor};
use crate::types::{LatchingEvent, Long};

/// Predicate that can veto a qualifying hit.
pub type BreakpointCondition = Box<dyn Fn(Address, Long) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakpointKind {
    /// Hit when the CPU fetches an instruction at the address
    Execute,
    /// Hit on data writes to the address
    Write,
    /// Hit on data reads or fetches from the address
    Read,
    /// Hit on any access to the address
    ReadOrWrite,
    /// Execute breakpoint that only fires every Nth hit
    Counter,
    /// Execute breakpoint that removes itself after the first hit
    OneShot,
    /// Execute breakpoint that survives debugger clear-all operations
    Permanent,
    /// Execute breakpoint set by the emulator itself, hidden from listings
    Internal,
}

#[derive(Serialize, Deserialize)]
pub struct Breakpoint {
    pub address: Address,
    pub kind: BreakpointKind,
    pub active: bool,

    /// Remaining hits before a Counter breakpoint fires
    pub counter: u32,
    /// Counter reload value after firing
    pub counter_reset: u32,

    /// Only hit when the accessed value matches
    pub value: Option<Long>,
    /// Only hit when the access width matches
    pub size: Option<AccessSize>,

    #[serde(skip)]
    pub condition: Option<BreakpointCondition>,
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("address", &format_args!("{:06X}", self.address))
            .field("kind", &self.kind)
            .field("active", &self.active)
            .field("counter", &self.counter)
            .field("value", &self.value)
            .field("size", &self.size)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

impl Breakpoint {
    pub fn new(address: Address, kind: BreakpointKind) -> Self {
        Self {
            address,
            kind,
            active: true,
            counter: 0,
            counter_reset: 0,
            value: None,
            size: None,
            condition: None,
        }
    }

    /// Fires on every `every`th hit.
    pub fn counter(address: Address, every: u32) -> Self {
        let reload = every.saturating_sub(1);
        Self {
            counter: reload,
            counter_reset: reload,
            ..Self::new(address, BreakpointKind::Counter)
        }
    }

    pub fn with_value(mut self, value: Long, size: AccessSize) -> Self {
        self.value = Some(value);
        self.size = Some(size);
        self
    }

    pub fn with_condition(mut self, condition: BreakpointCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    fn is_execute_kind(&self) -> bool {
        matches!(
            self.kind,
            BreakpointKind::Execute
                | BreakpointKind::Counter
                | BreakpointKind::OneShot
                | BreakpointKind::Permanent
                | BreakpointKind::Internal
        )
    }

    /// Whether an access-type breakpoint qualifies against a concrete
    /// access (address already matched).
    fn qualifies(&self, addr: Address, value: Long, size: AccessSize) -> bool {
        if !self.active {
            return false;
        }
        if let Some(expected_size) = self.size {
            if expected_size != size {
                return false;
            }
        }
        if let Some(expected) = self.value {
            if expected != value {
                return false;
            }
        }
        if let Some(cond) = &self.condition {
            if !cond(addr, value) {
                return false;
            }
        }
        true
    }
}

/// All configured breakpoints plus the sticky hit flag the scheduler polls.
///
/// Hit state is a level, not an edge queue; the scheduler only cares
/// whether anything hit since it last asked.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BreakpointCollection {
    breakpoints: Vec<Breakpoint>,
    hit: LatchingEvent,
}

impl BreakpointCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, bp: Breakpoint) {
        self.breakpoints.push(bp);
    }

    /// Removes all breakpoints at the address. Returns whether any existed.
    pub fn clear(&mut self, address: Address) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.address != address);
        before != self.breakpoints.len()
    }

    /// Removes everything except Permanent and Internal breakpoints.
    pub fn clear_all(&mut self) {
        self.breakpoints.retain(|bp| {
            matches!(
                bp.kind,
                BreakpointKind::Permanent | BreakpointKind::Internal
            )
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints
            .iter()
            .filter(|bp| bp.kind != BreakpointKind::Internal)
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Reads and clears the sticky hit flag.
    pub fn breakpoint_hit(&mut self) -> bool {
        self.hit.get_clear()
    }

    /// Execute-breakpoint check, called from the CPU fetch path for every
    /// instruction boundary.
    pub fn is_breakpoint(&mut self, pc: Address) -> bool {
        let mut hit = false;
        let mut oneshot_fired = false;

        for bp in self.breakpoints.iter_mut() {
            if bp.address != pc || !bp.active || !bp.is_execute_kind() {
                continue;
            }
            match bp.kind {
                BreakpointKind::Counter => {
                    if bp.counter == 0 {
                        bp.counter = bp.counter_reset;
                        hit = true;
                    } else {
                        bp.counter -= 1;
                    }
                }
                BreakpointKind::OneShot => {
                    oneshot_fired = true;
                    hit = true;
                }
                _ => hit = true,
            }
        }
        if oneshot_fired {
            // Every one-shot that matched this fetch is spent
            self.breakpoints.retain(|bp| {
                !(bp.kind == BreakpointKind::OneShot && bp.address == pc && bp.active)
            });
        }
        if hit {
            self.hit.set();
        }
        hit
    }

    fn check_access(&mut self, addr: Address, value: Long, size: AccessSize, write: bool) {
        let mut hit = false;
        for bp in &self.breakpoints {
            if bp.address != addr {
                continue;
            }
            let direction_matches = match bp.kind {
                BreakpointKind::Write => write,
                BreakpointKind::Read => !write,
                BreakpointKind::ReadOrWrite => true,
                _ => false,
            };
            if direction_matches && bp.qualifies(addr, value, size) {
                hit = true;
            }
        }
        if hit {
            self.hit.set();
        }
    }
}

impl BusInterceptor for BreakpointCollection {
    fn on_write(&mut self, _pc: Address, addr: Address, val: Long, size: AccessSize) {
        self.check_access(addr, val, size, true);
    }

    fn on_read(&mut self, _pc: Address, addr: Address, val: Long, size: AccessSize) {
        self.check_access(addr, val, size, false);
    }

    fn on_fetch(&mut self, _pc: Address, addr: Address, val: Long, size: AccessSize) {
        // Execute breakpoints go through is_breakpoint() on the CPU fetch
        // path; this only serves read-type watches on code addresses.
        self.check_access(addr, val, size, false);
    }
}
