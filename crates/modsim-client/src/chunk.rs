use crate::function::FunctionCode;
use modsim_device::SPACE_SIZE;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("function code {0} has no size class")]
    InvalidFunctionCode(u8),
    #[error("range {address}+{quantity} exceeds the 16-bit address space")]
    RangeOverflow { address: u16, quantity: u16 },
    #[error("{budget} byte budget cannot carry one item of function code {function}")]
    BudgetTooSmall { function: u8, budget: usize },
}

/// One wire-sized piece of a [`Command`](crate::Command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRequest {
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
}

impl SubRequest {
    /// One past the last address covered, as `usize` so `65536` is representable.
    pub fn end(&self) -> usize {
        usize::from(self.address) + usize::from(self.quantity)
    }
}

impl fmt::Display for SubRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function {} address {} quantity {}",
            self.function, self.address, self.quantity
        )
    }
}

/// Splits `[address, address + quantity)` into ascending pieces of at most
/// `function.max_items_fitting(byte_budget)` items each.
///
/// The caller picks the budget for the function's direction. A zero quantity
/// yields an empty plan; otherwise the budget must fit at least one item.
pub fn chunk(
    function: FunctionCode,
    address: u16,
    quantity: u16,
    byte_budget: usize,
) -> Result<Vec<SubRequest>, ChunkError> {
    let per_request = function
        .max_items_fitting(byte_budget)
        .ok_or(ChunkError::InvalidFunctionCode(function.as_u8()))?;
    let end = usize::from(address) + usize::from(quantity);
    if end > SPACE_SIZE {
        return Err(ChunkError::RangeOverflow { address, quantity });
    }
    if quantity == 0 {
        return Ok(Vec::new());
    }
    if per_request == 0 {
        return Err(ChunkError::BudgetTooSmall {
            function: function.as_u8(),
            budget: byte_budget,
        });
    }

    let mut plan = Vec::with_capacity(usize::from(quantity.div_ceil(per_request)));
    let mut next = address;
    let mut remaining = quantity;
    while remaining > 0 {
        let take = remaining.min(per_request);
        plan.push(SubRequest {
            function,
            address: next,
            quantity: take,
        });
        remaining -= take;
        // Wraps only after the final piece ending at 65536, when the loop exits.
        next = next.wrapping_add(take);
    }
    Ok(plan)
}
