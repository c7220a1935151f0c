use std::fmt;

/// Highest code that is not an exception response.
pub const MAX_FUNCTION_CODE: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    Custom(u8),
}

/// How a function's items are encoded, which bounds how many fit one PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    ReadBits,
    WriteBits,
    ReadWords,
    WriteWords,
    Single,
}

impl SizeClass {
    pub const ALL: [SizeClass; 5] = [
        Self::ReadBits,
        Self::WriteBits,
        Self::ReadWords,
        Self::WriteWords,
        Self::Single,
    ];

    /// `(fixed pdu bytes, ceiling)`; the ceilings are the protocol maxima.
    const fn limits(self) -> (usize, usize) {
        match self {
            Self::ReadBits => (2, 2000),
            Self::WriteBits => (6, 1968),
            Self::ReadWords => (2, 125),
            Self::WriteWords => (6, 123),
            Self::Single => (5, 1),
        }
    }

    pub const fn is_write(self) -> bool {
        matches!(self, Self::WriteBits | Self::WriteWords | Self::Single)
    }

    /// PDU bytes carrying `items`: the response for reads, the request for writes.
    pub const fn pdu_len(self, items: usize) -> usize {
        let (fixed, _) = self.limits();
        match self {
            Self::ReadBits | Self::WriteBits => fixed + items.div_ceil(8),
            Self::ReadWords | Self::WriteWords => fixed + items * 2,
            Self::Single => fixed,
        }
    }
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::Custom(code) => code,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            _ => Self::Custom(value),
        }
    }

    /// Codes the simulator can chunk, execute and serve.
    pub const fn is_supported(self) -> bool {
        self.size_class().is_some()
    }

    pub const fn is_write_to_server(self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
        )
    }

    pub const fn size_class(self) -> Option<SizeClass> {
        match self {
            Self::ReadCoils | Self::ReadDiscreteInputs => Some(SizeClass::ReadBits),
            Self::WriteMultipleCoils => Some(SizeClass::WriteBits),
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => Some(SizeClass::ReadWords),
            Self::WriteMultipleRegisters => Some(SizeClass::WriteWords),
            Self::WriteSingleCoil | Self::WriteSingleRegister => Some(SizeClass::Single),
            Self::Custom(_) => None,
        }
    }

    /// Items one request may carry when its PDU must fit `byte_budget` bytes.
    ///
    /// `Some(0)` means the budget cannot carry a single item.
    pub fn max_items_fitting(self, byte_budget: usize) -> Option<u16> {
        let class = self.size_class()?;
        let (fixed, ceiling) = class.limits();
        let Some(payload) = byte_budget.checked_sub(fixed) else {
            return Some(0);
        };
        let items = match class {
            SizeClass::ReadBits | SizeClass::WriteBits => payload.saturating_mul(8),
            SizeClass::ReadWords | SizeClass::WriteWords => payload / 2,
            SizeClass::Single => 1,
        };
        u16::try_from(items.min(ceiling)).ok()
    }
}

impl From<u8> for FunctionCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::{FunctionCode, SizeClass};

    #[test]
    fn parses_known_codes() {
        assert_eq!(FunctionCode::from_u8(0x03), FunctionCode::ReadHoldingRegisters);
        assert_eq!(FunctionCode::from_u8(0x10), FunctionCode::WriteMultipleRegisters);
        assert_eq!(FunctionCode::from_u8(0x16), FunctionCode::Custom(0x16));
        assert_eq!(FunctionCode::from_u8(99), FunctionCode::Custom(99));
        assert_eq!(FunctionCode::WriteMultipleCoils.as_u8(), 15);
    }

    #[test]
    fn supported_set_is_the_eight_basic_codes() {
        let supported: Vec<u8> = (0..=127u8)
            .filter(|code| FunctionCode::from_u8(*code).is_supported())
            .collect();
        assert_eq!(supported, vec![1, 2, 3, 4, 5, 6, 15, 16]);
        assert!(!FunctionCode::Custom(0x17).is_supported());
        assert!(!FunctionCode::Custom(0x17).is_write_to_server());
    }

    #[test]
    fn write_and_size_attributes_are_orthogonal() {
        assert!(!FunctionCode::ReadCoils.is_write_to_server());
        assert!(FunctionCode::WriteSingleCoil.is_write_to_server());
        assert_eq!(FunctionCode::ReadCoils.size_class(), Some(SizeClass::ReadBits));
        assert_eq!(FunctionCode::WriteSingleCoil.size_class(), Some(SizeClass::Single));
        assert_eq!(
            FunctionCode::WriteMultipleRegisters.size_class(),
            Some(SizeClass::WriteWords)
        );
        assert_eq!(FunctionCode::Custom(0x41).size_class(), None);
    }

    #[test]
    fn max_items_follow_budget_and_ceiling() {
        // RTU frame of 256 bytes leaves a 253 byte PDU.
        assert_eq!(FunctionCode::ReadCoils.max_items_fitting(253), Some(2000));
        assert_eq!(FunctionCode::WriteMultipleCoils.max_items_fitting(253), Some(1968));
        assert_eq!(FunctionCode::ReadHoldingRegisters.max_items_fitting(253), Some(125));
        assert_eq!(FunctionCode::WriteMultipleRegisters.max_items_fitting(253), Some(123));

        assert_eq!(FunctionCode::ReadInputRegisters.max_items_fitting(22), Some(10));
        assert_eq!(FunctionCode::WriteMultipleRegisters.max_items_fitting(26), Some(10));
        assert_eq!(FunctionCode::ReadDiscreteInputs.max_items_fitting(4), Some(16));

        assert_eq!(FunctionCode::WriteSingleRegister.max_items_fitting(253), Some(1));
        assert_eq!(FunctionCode::Custom(0x16).max_items_fitting(253), None);
    }

    #[test]
    fn budgets_below_one_item_fit_nothing() {
        assert_eq!(FunctionCode::ReadCoils.max_items_fitting(2), Some(0));
        assert_eq!(FunctionCode::ReadCoils.max_items_fitting(3), Some(8));
        assert_eq!(FunctionCode::ReadHoldingRegisters.max_items_fitting(3), Some(0));
        assert_eq!(FunctionCode::WriteMultipleRegisters.max_items_fitting(7), Some(0));
        assert_eq!(FunctionCode::WriteMultipleRegisters.max_items_fitting(8), Some(1));
        assert_eq!(FunctionCode::WriteSingleCoil.max_items_fitting(4), Some(0));
        assert_eq!(FunctionCode::WriteSingleCoil.max_items_fitting(5), Some(1));
    }

    #[test]
    fn fitted_items_never_exceed_budget() {
        for class in SizeClass::ALL {
            for budget in 0..=300 {
                let function = match class {
                    SizeClass::ReadBits => FunctionCode::ReadCoils,
                    SizeClass::WriteBits => FunctionCode::WriteMultipleCoils,
                    SizeClass::ReadWords => FunctionCode::ReadInputRegisters,
                    SizeClass::WriteWords => FunctionCode::WriteMultipleRegisters,
                    SizeClass::Single => FunctionCode::WriteSingleRegister,
                };
                let items = function.max_items_fitting(budget).unwrap();
                if items > 0 {
                    assert!(class.pdu_len(usize::from(items)) <= budget, "{class:?} {budget}");
                }
            }
        }
    }
}
