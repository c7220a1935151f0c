use crate::function::{FunctionCode, MAX_FUNCTION_CODE};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("function code required")]
    FunctionCodeRequired,
    #[error("function code {token} parse error: {reason}")]
    FunctionCodeParse { token: String, reason: String },
    #[error("unsupported function code {0}")]
    UnsupportedFunctionCode(u8),
    #[error("address {token} parse error: {reason}")]
    AddressParse { token: String, reason: String },
    #[error("quantity {token} parse error: {reason}")]
    QuantityParse { token: String, reason: String },
    #[error("quantity must be at least 1")]
    ZeroQuantity,
}

/// One operator request before it is split into wire-sized pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.function, self.address, self.quantity)
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s)
    }
}

/// Parses `<function code> [<address> [<quantity>]]`, base 10.
///
/// Address defaults to 0 and quantity to 1; tokens past the third are ignored.
pub fn parse_command<S: AsRef<str>>(tokens: &[S]) -> Result<Command, CommandError> {
    let mut tokens = tokens.iter().map(AsRef::as_ref);

    let token = tokens.next().ok_or(CommandError::FunctionCodeRequired)?;
    let code = parse_function_code(token)?;
    let function = FunctionCode::from_u8(code);
    if !function.is_supported() {
        return Err(CommandError::UnsupportedFunctionCode(code));
    }

    let address = match tokens.next() {
        Some(token) => token
            .parse::<u16>()
            .map_err(|err| CommandError::AddressParse {
                token: token.to_string(),
                reason: err.to_string(),
            })?,
        None => 0,
    };

    let quantity = match tokens.next() {
        Some(token) => token
            .parse::<u16>()
            .map_err(|err| CommandError::QuantityParse {
                token: token.to_string(),
                reason: err.to_string(),
            })?,
        None => 1,
    };
    if quantity == 0 {
        return Err(CommandError::ZeroQuantity);
    }

    Ok(Command {
        function,
        address,
        quantity,
    })
}

/// Splits on whitespace, so surrounding blanks and carriage returns never reach a token.
pub fn parse_line(line: &str) -> Result<Command, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    parse_command(&tokens)
}

fn parse_function_code(token: &str) -> Result<u8, CommandError> {
    let parse_error = |reason: String| CommandError::FunctionCodeParse {
        token: token.to_string(),
        reason,
    };
    let code = token.parse::<u8>().map_err(|err| parse_error(err.to_string()))?;
    if code > MAX_FUNCTION_CODE {
        return Err(parse_error(format!("value out of range 0..={MAX_FUNCTION_CODE}")));
    }
    Ok(code)
}
