//! Subscribed automation items and per-item change tracking.
//!
//! An item derives its value from one register of one bank. Digital items
//! watch a single bit of the register word (bits are 1-based, matching the
//! device documentation); analog items take the whole word, optionally
//! scaled by a divisor. Each item carries a `changed` flag that is set when
//! a refresh produces a different derived value and cleared when the value
//! is read.

use crate::cache::BankKind;

/// Derives a digital value from a register word.
///
/// Bit positions are 1-based: bit 1 is the least significant, bit 16 the
/// most significant. Bit 0 and bits above 16 never match, so a
/// misconfigured item reads as off instead of faulting the poll cycle.
///
/// # Example
///
/// ```
/// use picnet_sapp::items::derive_bit;
///
/// assert!(derive_bit(0b0000_0100, 3));
/// assert!(!derive_bit(0b0000_0100, 1));
/// ```
#[inline]
pub fn derive_bit(value: u16, bit: u8) -> bool {
    if bit == 0 || bit > 16 {
        return false;
    }
    (value >> (bit - 1)) & 1 != 0
}

/// The value an item currently exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValue {
    /// A digital (bit-derived) value.
    Digital(bool),
    /// An analog value, already scaled and formatted.
    Analog(String),
}

/// A digital item: one bit of one register word.
#[derive(Debug, Clone)]
pub struct DigitalItem {
    bank: BankKind,
    read_address: u16,
    read_bit: u8,
    write: Option<(u16, u8)>,
    value: bool,
    changed: bool,
}

impl DigitalItem {
    /// Creates a read-only digital item.
    pub fn new(bank: BankKind, read_address: u16, read_bit: u8) -> Self {
        Self {
            bank,
            read_address,
            read_bit,
            write: None,
            value: false,
            changed: false,
        }
    }

    /// Attaches a write target (address, bit) for writable kinds.
    pub fn with_write(mut self, address: u16, bit: u8) -> Self {
        self.write = Some((address, bit));
        self
    }

    /// Returns the write target, if any.
    pub fn write_target(&self) -> Option<(u16, u8)> {
        self.write
    }

    fn update(&mut self, register_value: u16) {
        let new_value = derive_bit(register_value, self.read_bit);
        if new_value != self.value {
            self.value = new_value;
            self.changed = true;
        } else {
            self.changed = false;
        }
    }
}

/// An analog item: a whole register word with optional scaling.
#[derive(Debug, Clone)]
pub struct AnalogItem {
    bank: BankKind,
    read_address: u16,
    divisor: Option<f64>,
    value: String,
    changed: bool,
}

impl AnalogItem {
    /// Creates an unscaled analog item.
    pub fn new(bank: BankKind, read_address: u16) -> Self {
        Self {
            bank,
            read_address,
            divisor: None,
            value: String::new(),
            changed: false,
        }
    }

    /// Sets a scaling divisor applied before formatting.
    pub fn with_divisor(mut self, divisor: f64) -> Self {
        self.divisor = Some(divisor);
        self
    }

    fn update(&mut self, register_value: u16) {
        let formatted = match self.divisor {
            Some(divisor) => ((f64::from(register_value) / divisor).round() as i64).to_string(),
            None => register_value.to_string(),
        };
        if formatted != self.value {
            self.value = formatted;
            self.changed = true;
        } else {
            self.changed = false;
        }
    }
}

/// A subscribed item, digital or analog.
#[derive(Debug, Clone)]
pub enum SappItem {
    /// Bit-derived item.
    Digital(DigitalItem),
    /// Word-derived item.
    Analog(AnalogItem),
}

impl SappItem {
    /// Returns the bank this item reads from.
    pub fn bank(&self) -> BankKind {
        match self {
            Self::Digital(item) => item.bank,
            Self::Analog(item) => item.bank,
        }
    }

    /// Returns the register address this item reads.
    pub fn read_address(&self) -> u16 {
        match self {
            Self::Digital(item) => item.read_address,
            Self::Analog(item) => item.read_address,
        }
    }

    /// Re-derives the item value from a freshly read register word,
    /// setting the changed flag if the derived value differs.
    pub fn update_from(&mut self, register_value: u16) {
        match self {
            Self::Digital(item) => item.update(register_value),
            Self::Analog(item) => item.update(register_value),
        }
    }

    /// Returns whether the last update changed the derived value.
    pub fn has_changed(&self) -> bool {
        match self {
            Self::Digital(item) => item.changed,
            Self::Analog(item) => item.changed,
        }
    }

    /// Returns the current value and clears the changed flag.
    pub fn take_value(&mut self) -> ItemValue {
        match self {
            Self::Digital(item) => {
                item.changed = false;
                ItemValue::Digital(item.value)
            }
            Self::Analog(item) => {
                item.changed = false;
                ItemValue::Analog(item.value.clone())
            }
        }
    }

    /// Returns the current value without touching the changed flag.
    pub fn peek_value(&self) -> ItemValue {
        match self {
            Self::Digital(item) => ItemValue::Digital(item.value),
            Self::Analog(item) => ItemValue::Analog(item.value.clone()),
        }
    }
}
