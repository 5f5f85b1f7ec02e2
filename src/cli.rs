use std::path::PathBuf;

use clap::Parser;

fn parse_u32_with_hex(input: &str) -> Result<u32, String> {
    let s = input.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value '{input}': {e}"))
    } else {
        s.parse::<u32>()
            .map_err(|e| format!("invalid decimal value '{input}': {e}"))
    }
}

fn parse_i64_with_hex(input: &str) -> Result<i64, String> {
    let s = input.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value '{input}': {e}"))?
    } else {
        digits
            .parse::<i64>()
            .map_err(|e| format!("invalid decimal value '{input}': {e}"))?
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// `NAME=ADDR` binding of an external symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub address: u32,
}

fn parse_binding(input: &str) -> Result<Binding, String> {
    let (name, address) = input
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=ADDR, got '{input}'"))?;
    if name.is_empty() {
        return Err(format!("missing symbol name in '{input}'"));
    }
    Ok(Binding {
        name: name.to_string(),
        address: parse_u32_with_hex(address)?,
    })
}

/// `BITS:ADDR=VALUE` memory initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Init {
    pub bits: u32,
    pub address: u32,
    pub value: i64,
}

fn parse_init(input: &str) -> Result<Init, String> {
    let (bits, rest) = input
        .split_once(':')
        .ok_or_else(|| format!("expected BITS:ADDR=VALUE, got '{input}'"))?;
    let (address, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("expected BITS:ADDR=VALUE, got '{input}'"))?;
    let bits = bits
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid width '{bits}': {e}"))?;
    if !matches!(bits, 8 | 16 | 32) {
        return Err(format!("width must be 8, 16 or 32, got {bits}"));
    }
    Ok(Init {
        bits,
        address: parse_u32_with_hex(address)?,
        value: parse_i64_with_hex(value)?,
    })
}

#[derive(Debug, Parser)]
#[command(name = "sh4objtest", version, about = "Run SH4 object code against expectations")]
pub struct Args {
    #[arg(value_name = "OBJECT")]
    pub object: PathBuf,

    /// Exported symbol to call. Without it the object is only summarised.
    #[arg(short = 'e', long = "entry")]
    pub entry: Option<String>,

    #[arg(long = "arg", value_name = "INT", value_parser = parse_i64_with_hex, allow_hyphen_values = true)]
    pub args: Vec<i64>,

    #[arg(long = "float-arg", value_name = "F", allow_hyphen_values = true)]
    pub float_args: Vec<f32>,

    #[arg(long = "return", value_name = "INT", value_parser = parse_i64_with_hex, allow_hyphen_values = true, conflicts_with = "float_return")]
    pub expected_return: Option<i64>,

    #[arg(long = "float-return", value_name = "F", allow_hyphen_values = true)]
    pub float_return: Option<f32>,

    #[arg(short = 'b', long = "bind", value_name = "NAME=ADDR", value_parser = parse_binding)]
    pub bindings: Vec<Binding>,

    #[arg(long = "init", value_name = "BITS:ADDR=VALUE", value_parser = parse_init)]
    pub inits: Vec<Init>,

    #[arg(long = "randomize-memory")]
    pub randomize_memory: bool,

    #[arg(short = 'd', long = "disasm")]
    pub disasm: bool,

    /// Instruction budget; 0 disables the watchdog.
    #[arg(long = "max-instructions", default_value_t = 10_000_000)]
    pub max_instructions: u64,

    #[arg(short = 'c', long = "coverage")]
    pub coverage: bool,

    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,
}
