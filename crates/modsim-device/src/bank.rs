use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Number of addressable cells in each space (`0..=65535`).
pub const SPACE_SIZE: usize = 0x1_0000;

/// One of the four independently addressed Modbus memory spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    DiscreteInputs,
    Coils,
    InputRegisters,
    HoldingRegisters,
}

impl Space {
    pub const ALL: [Space; 4] = [
        Space::DiscreteInputs,
        Space::Coils,
        Space::InputRegisters,
        Space::HoldingRegisters,
    ];

    pub const fn is_bit(self) -> bool {
        matches!(self, Space::DiscreteInputs | Space::Coils)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Space::DiscreteInputs => "discrete inputs",
            Space::Coils => "coils",
            Space::InputRegisters => "input registers",
            Space::HoldingRegisters => "holding registers",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    #[error("{space} range {address}+{quantity} exceeds space size {size}")]
    OutOfBounds {
        space: Space,
        address: u16,
        quantity: usize,
        size: usize,
    },
    #[error("empty {space} range at {address}")]
    EmptyRange { space: Space, address: u16 },
    #[error("{space} does not hold {expected} values")]
    WrongSpace { space: Space, expected: &'static str },
}

/// Initial contents selector for a freshly started device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPattern {
    /// Zero-fills all four spaces.
    ///
    /// The name comes from an "address mod 3" pattern (bits set where
    /// `address % 3 == 0`, registers holding `address * 3`) that was documented
    /// for this selector but never applied; only the zero fill is implemented.
    #[default]
    Am3,
    /// Leaves the bank as constructed.
    None,
}

#[derive(Debug)]
struct BitSpace(RwLock<Vec<bool>>);

#[derive(Debug)]
struct WordSpace(RwLock<Vec<u16>>);

/// Process-wide device memory, shared by every connection through `Arc`.
///
/// Each space sits behind its own lock, so a single read or write of a
/// contiguous range is atomic with respect to other callers.
#[derive(Debug)]
pub struct RegisterBank {
    discrete_inputs: BitSpace,
    coils: BitSpace,
    input_registers: WordSpace,
    holding_registers: WordSpace,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    /// A bank with the full 65536 cells in every space, zero-filled.
    pub fn new() -> Self {
        Self::with_sizes(SPACE_SIZE, SPACE_SIZE, SPACE_SIZE, SPACE_SIZE)
    }

    pub fn with_sizes(
        discrete_input_count: usize,
        coil_count: usize,
        input_register_count: usize,
        holding_register_count: usize,
    ) -> Self {
        Self {
            discrete_inputs: BitSpace(RwLock::new(vec![false; discrete_input_count])),
            coils: BitSpace(RwLock::new(vec![false; coil_count])),
            input_registers: WordSpace(RwLock::new(vec![0u16; input_register_count])),
            holding_registers: WordSpace(RwLock::new(vec![0u16; holding_register_count])),
        }
    }

    pub fn size(&self, space: Space) -> usize {
        match space {
            Space::DiscreteInputs | Space::Coils => self
                .bits(space)
                .map(|bits| bits.0.read().unwrap_or_else(PoisonError::into_inner).len())
                .unwrap_or(0),
            Space::InputRegisters | Space::HoldingRegisters => self
                .words(space)
                .map(|words| words.0.read().unwrap_or_else(PoisonError::into_inner).len())
                .unwrap_or(0),
        }
    }

    pub fn read_bits(
        &self,
        space: Space,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, BankError> {
        let cells = self
            .bits(space)?
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let range = checked_range(space, address, usize::from(quantity), cells.len())?;
        Ok(cells[range].to_vec())
    }

    pub fn write_bits(
        &self,
        space: Space,
        address: u16,
        values: &[bool],
    ) -> Result<(), BankError> {
        let mut cells = self
            .bits(space)?
            .0
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let range = checked_range(space, address, values.len(), cells.len())?;
        cells[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_words(
        &self,
        space: Space,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, BankError> {
        let cells = self
            .words(space)?
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let range = checked_range(space, address, usize::from(quantity), cells.len())?;
        Ok(cells[range].to_vec())
    }

    pub fn write_words(
        &self,
        space: Space,
        address: u16,
        values: &[u16],
    ) -> Result<(), BankError> {
        let mut cells = self
            .words(space)?
            .0
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let range = checked_range(space, address, values.len(), cells.len())?;
        cells[range].copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&self, pattern: FillPattern) {
        match pattern {
            FillPattern::Am3 => {
                for bits in [&self.discrete_inputs, &self.coils] {
                    bits.0.write().unwrap_or_else(PoisonError::into_inner).fill(false);
                }
                for words in [&self.input_registers, &self.holding_registers] {
                    words.0.write().unwrap_or_else(PoisonError::into_inner).fill(0);
                }
            }
            FillPattern::None => {}
        }
    }

    fn bits(&self, space: Space) -> Result<&BitSpace, BankError> {
        match space {
            Space::DiscreteInputs => Ok(&self.discrete_inputs),
            Space::Coils => Ok(&self.coils),
            Space::InputRegisters | Space::HoldingRegisters => Err(BankError::WrongSpace {
                space,
                expected: "bit",
            }),
        }
    }

    fn words(&self, space: Space) -> Result<&WordSpace, BankError> {
        match space {
            Space::InputRegisters => Ok(&self.input_registers),
            Space::HoldingRegisters => Ok(&self.holding_registers),
            Space::DiscreteInputs | Space::Coils => Err(BankError::WrongSpace {
                space,
                expected: "register",
            }),
        }
    }
}

fn checked_range(
    space: Space,
    address: u16,
    quantity: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, BankError> {
    if quantity == 0 {
        return Err(BankError::EmptyRange { space, address });
    }
    let start = usize::from(address);
    match start.checked_add(quantity) {
        Some(end) if end <= len => Ok(start..end),
        _ => Err(BankError::OutOfBounds {
            space,
            address,
            quantity,
            size: len,
        }),
    }
}
