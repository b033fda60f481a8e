//! Register cache and differential diff engine.
//!
//! One [`RegisterBank`] exists per register kind (input, output, virtual).
//! A bank tracks the set of watched addresses and the last value observed
//! at each. The first refresh of a bank issues an individual full read per
//! watched address; once warm, a single differential read fetches only the
//! addresses the device reports as changed, and the bank merges entries
//! that are both watched and actually different. Differential values for
//! unwatched addresses are discarded.
//!
//! A failed bank refresh leaves the bank untouched for that cycle (stale
//! but available) and refreshes the session connection; it never aborts
//! the poll loop.
//!
//! The bank maps are mutated exclusively by the poll cycle; producers on
//! other threads only ever read item state through the engine.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::items::{ItemValue, SappItem};
use crate::session::Sapp;

/// The three register banks of a MAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    /// Physical input modules.
    Input,
    /// Physical output modules.
    Output,
    /// Virtual variables.
    Virtual,
}

impl BankKind {
    /// Returns the lowercase bank name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Virtual => "virtual",
        }
    }
}

/// Whether a bank has completed its first full read.
///
/// Modeled as a single per-bank state rather than free-floating booleans
/// so the first-pass decision can never disagree with the stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    /// No successful full read yet; the next refresh reads every watched
    /// address individually.
    Uninitialized,
    /// At least one full pass completed; refreshes use differential reads.
    Warm,
}

/// Last-known values for the watched addresses of one register bank.
#[derive(Debug)]
pub struct RegisterBank {
    kind: BankKind,
    state: BankState,
    watched: BTreeSet<u16>,
    values: HashMap<u16, u16>,
}

impl RegisterBank {
    fn new(kind: BankKind) -> Self {
        Self {
            kind,
            state: BankState::Uninitialized,
            watched: BTreeSet::new(),
            values: HashMap::new(),
        }
    }

    /// Adds an address to the watched set.
    pub fn watch(&mut self, addr: u16) {
        self.watched.insert(addr);
    }

    /// Returns the last observed value at `addr`, if any read succeeded yet.
    pub fn value(&self, addr: u16) -> Option<u16> {
        self.values.get(&addr).copied()
    }

    /// Returns the bank's first-pass state.
    pub fn state(&self) -> BankState {
        self.state
    }

    /// Merges a differential delta: only addresses that are watched and
    /// whose value actually differs are stored. Re-reporting an unchanged
    /// value must not look like a change downstream.
    pub fn apply_delta(&mut self, delta: &HashMap<u16, u16>) {
        for (&addr, &value) in delta {
            if self.watched.contains(&addr) && self.values.get(&addr) != Some(&value) {
                self.values.insert(addr, value);
            }
        }
    }

    /// Refreshes this bank through the session: full reads on the first
    /// pass, one differential read afterwards.
    fn refresh(&mut self, sapp: &mut Sapp) -> Result<()> {
        match self.state {
            BankState::Uninitialized => {
                for &addr in &self.watched {
                    let value = match self.kind {
                        BankKind::Input => sapp.read_input(addr)?,
                        BankKind::Output => sapp.read_output(addr)?,
                        BankKind::Virtual => sapp.read_virtual(addr)?,
                    };
                    debug!(bank = self.kind.name(), addr, value, "first value");
                    self.values.insert(addr, value);
                }
                self.state = BankState::Warm;
            }
            BankState::Warm => {
                let delta = match self.kind {
                    BankKind::Input => sapp.read_changed_inputs()?,
                    BankKind::Output => sapp.read_changed_outputs()?,
                    BankKind::Virtual => sapp.read_changed_virtuals()?,
                };
                self.apply_delta(&delta);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = BankState::Uninitialized;
        self.values.clear();
    }
}

/// The three banks plus the subscribed items deriving values from them.
#[derive(Debug)]
pub struct RegisterCache {
    inputs: RegisterBank,
    outputs: RegisterBank,
    virtuals: RegisterBank,
    items: HashMap<String, SappItem>,
}

impl Default for RegisterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterCache {
    /// Creates an empty cache with all banks uninitialized.
    pub fn new() -> Self {
        Self {
            inputs: RegisterBank::new(BankKind::Input),
            outputs: RegisterBank::new(BankKind::Output),
            virtuals: RegisterBank::new(BankKind::Virtual),
            items: HashMap::new(),
        }
    }

    /// Returns the bank of the given kind.
    pub fn bank(&self, kind: BankKind) -> &RegisterBank {
        match kind {
            BankKind::Input => &self.inputs,
            BankKind::Output => &self.outputs,
            BankKind::Virtual => &self.virtuals,
        }
    }

    fn bank_mut(&mut self, kind: BankKind) -> &mut RegisterBank {
        match kind {
            BankKind::Input => &mut self.inputs,
            BankKind::Output => &mut self.outputs,
            BankKind::Virtual => &mut self.virtuals,
        }
    }

    /// Adds an address to a bank's watched set.
    pub fn watch(&mut self, kind: BankKind, addr: u16) {
        self.bank_mut(kind).watch(addr);
    }

    /// Registers an item and watches its read address.
    pub fn add_item(&mut self, id: impl Into<String>, item: SappItem) {
        let id = id.into();
        debug!(id = %id, bank = item.bank().name(), addr = item.read_address(), "added item");
        self.watch(item.bank(), item.read_address());
        self.items.insert(id, item);
    }

    /// Refreshes all three banks and then re-derives every item value.
    ///
    /// A bank that fails to read is left unchanged for this cycle; the
    /// session connection is refreshed and the next bank still runs.
    pub fn refresh_all(&mut self, sapp: &mut Sapp) {
        for kind in [BankKind::Output, BankKind::Input, BankKind::Virtual] {
            if let Err(e) = self.bank_mut(kind).refresh(sapp) {
                warn!(bank = kind.name(), error = %e, "bank update failed");
                if let Err(refresh_err) = sapp.refresh() {
                    error!(error = %refresh_err, "connection refresh failed");
                }
            }
        }
        self.update_items();
    }

    /// Re-derives every item from its bank's last value. Addresses never
    /// read yet are skipped without touching the item.
    pub fn update_items(&mut self) {
        for item in self.items.values_mut() {
            if let Some(value) = match item.bank() {
                BankKind::Input => self.inputs.value(item.read_address()),
                BankKind::Output => self.outputs.value(item.read_address()),
                BankKind::Virtual => self.virtuals.value(item.read_address()),
            } {
                item.update_from(value);
            }
        }
    }

    /// Drains the changed flags: returns each changed item's id and value,
    /// clearing its flag.
    pub fn take_changed(&mut self) -> Vec<(String, ItemValue)> {
        let mut changed = Vec::new();
        for (id, item) in self.items.iter_mut() {
            if item.has_changed() {
                changed.push((id.clone(), item.take_value()));
            }
        }
        changed
    }

    /// Returns an item's current value without clearing its changed flag.
    pub fn item_value(&self, id: &str) -> Option<ItemValue> {
        self.items.get(id).map(SappItem::peek_value)
    }

    /// Returns whether an item currently has an unread change.
    pub fn item_changed(&self, id: &str) -> bool {
        self.items.get(id).is_some_and(SappItem::has_changed)
    }

    /// Clears all items and resets every bank to uninitialized, for device
    /// reconfiguration or disposal.
    pub fn purge(&mut self) {
        self.items.clear();
        self.inputs.reset();
        self.outputs.reset();
        self.virtuals.reset();
    }
}
