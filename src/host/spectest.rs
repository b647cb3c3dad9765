//! The spectest print handlers.
//!
//! Each handler formats its arguments and appends one newline-terminated
//! record to the instance's bounded output buffer, which the test driver
//! compares against expectations. Numeric formatting follows the C
//! lineage: `%d` for i32, `%lld` for i64, `%.9g` for f32 and `%.17g` for
//! f64, with pair forms joined by `", "`.

use crate::context::OutputBuffer;
use wasm5_core::UntypedValue;

pub const PRINT: u32 = 0;
pub const PRINT_I32: u32 = 1;
pub const PRINT_I64: u32 = 2;
pub const PRINT_F32: u32 = 3;
pub const PRINT_F64: u32 = 4;
pub const PRINT_I32_F32: u32 = 5;
pub const PRINT_F64_F64: u32 = 6;
pub const PRINT_CHAR: u32 = 7;

/// Formats a float the way C's `%.*g` does.
///
/// Chooses between plain and exponential notation based on the decimal
/// exponent, keeps at most `precision` significant digits and strips
/// trailing zeros. The exponent, when printed, is signed and at least two
/// digits wide.
pub fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return if value.is_sign_negative() {
            "-nan".into()
        } else {
            "nan".into()
        };
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf".into() } else { "inf".into() };
    }
    let precision = precision.max(1);
    // Round to `precision` significant digits first; the exponent of the
    // rounded value decides the notation.
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= precision as i32 {
        let mantissa = strip_trailing_zeros(mantissa);
        format!("{mantissa}e{exp:+03}")
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let plain = format!("{value:.decimals$}");
        strip_trailing_zeros(&plain).to_string()
    }
}

fn strip_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn record(out: &mut OutputBuffer, line: String) {
    out.append(line.as_bytes());
    out.append(b"\n");
}

/// Runs the spectest handler `handler` on the argument slots.
pub(crate) fn invoke(handler: u32, args: &[UntypedValue], out: &mut OutputBuffer) {
    match handler {
        PRINT => {}
        PRINT_I32 => record(out, format!("{} : i32", i32::from(args[0]))),
        PRINT_I64 => record(out, format!("{} : i64", i64::from(args[0]))),
        PRINT_F32 => {
            let value = f64::from(f32::from(args[0]));
            record(out, format!("{} : f32", format_g(value, 9)));
        }
        PRINT_F64 => {
            let value = f64::from(args[0]);
            record(out, format!("{} : f64", format_g(value, 17)));
        }
        PRINT_I32_F32 => {
            let lhs = i32::from(args[0]);
            let rhs = f64::from(f32::from(args[1]));
            record(out, format!("{} : i32, {} : f32", lhs, format_g(rhs, 9)));
        }
        PRINT_F64_F64 => {
            let lhs = f64::from(args[0]);
            let rhs = f64::from(args[1]);
            record(
                out,
                format!("{} : f64, {} : f64", format_g(lhs, 17), format_g(rhs, 17)),
            );
        }
        PRINT_CHAR => {
            out.append(&[u32::from(args[0]) as u8]);
            out.append(b"\n");
        }
        _ => unreachable!("spectest handler ids end at PRINT_CHAR"),
    }
}
