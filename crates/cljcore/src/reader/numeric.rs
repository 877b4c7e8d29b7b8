//! Numeric and character-literal token parsing (spec.md §4.1 tokenization rules).

use std::sync::LazyLock;

use num_bigint::BigInt;
use num_traits::Num;
use regex::Regex;

use crate::{
    error::{CResult, CompileError, ErrorKind},
    pos::CodeLoc,
    reader::value::Value,
};

/// Matches every numeric literal shape this reader accepts, with named
/// capture groups used to pick the right constructor afterwards. Built once
/// via `LazyLock`, mirroring the teacher's own lazily-built static tables
/// (`intern.rs`'s `ASCII_STRS`).
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(?P<sign>[-+])?
        (?:
            (?P<radix_base>[0-9]{1,2})r(?P<radix_digits>[0-9a-zA-Z]+)
          | (?P<numerator>[0-9]+)/(?P<denominator>[0-9]+)
          | (?P<int>[0-9]+)(?P<bigint>N)?
          | (?P<float_int>[0-9]+)
            (?:\.(?P<float_frac>[0-9]*))?
            (?:[eE](?P<exp>[-+]?[0-9]+))?
            (?P<decimal>M)?
        )$",
    )
    .expect("numeric literal grammar is a fixed, valid regex")
});

/// Returns true if `token` should be tokenized as a numeric literal rather
/// than a symbol — i.e. it starts with a digit, or a sign immediately
/// followed by a digit.
pub fn looks_like_number(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Parses a complete numeric token (already isolated by the tokenizer) into
/// a reader [`Value`].
pub fn parse_number(token: &str, loc: &CodeLoc) -> CResult<Value> {
    let caps = NUMBER_RE
        .captures(token)
        .ok_or_else(|| CompileError::at(ErrorKind::InvalidNumber, loc.clone(), format!("invalid numeric literal `{token}`")))?;

    let negative = caps.name("sign").is_some_and(|m| m.as_str() == "-");

    if let (Some(base), Some(digits)) = (caps.name("radix_base"), caps.name("radix_digits")) {
        let radix: u32 = base
            .as_str()
            .parse()
            .map_err(|_| CompileError::at(ErrorKind::InvalidNumber, loc.clone(), "invalid radix"))?;
        if !(2..=36).contains(&radix) {
            return Err(CompileError::at(
                ErrorKind::InvalidNumber,
                loc.clone(),
                format!("radix {radix} out of range 2..=36"),
            ));
        }
        let mut value = BigInt::from_str_radix(digits.as_str(), radix)
            .map_err(|_| CompileError::at(ErrorKind::InvalidNumber, loc.clone(), format!("invalid base-{radix} digits")))?;
        if negative {
            value = -value;
        }
        return Ok(shrink_bigint(value, false));
    }

    if let (Some(n), Some(d)) = (caps.name("numerator"), caps.name("denominator")) {
        let mut numerator: BigInt = n.as_str().parse().expect("regex guarantees digits");
        let denominator: BigInt = d.as_str().parse().expect("regex guarantees digits");
        if denominator == BigInt::from(0) {
            return Err(CompileError::at(ErrorKind::InvalidNumber, loc.clone(), "division by zero in ratio literal"));
        }
        if negative {
            numerator = -numerator;
        }
        return Ok(normalize_ratio(numerator, denominator));
    }

    if let Some(int_part) = caps.name("int") {
        let mut value: BigInt = int_part.as_str().parse().expect("regex guarantees digits");
        if negative {
            value = -value;
        }
        return Ok(shrink_bigint(value, caps.name("bigint").is_some()));
    }

    // Float / BigDecimal branch.
    let int_part = caps.name("float_int").expect("regex requires one numeric branch to match").as_str();
    let frac_part = caps.name("float_frac").map(|m| m.as_str()).unwrap_or("");
    let exp_part = caps.name("exp").map(|m| m.as_str());
    let is_decimal = caps.name("decimal").is_some();

    if is_decimal {
        let digits = format!("{int_part}{frac_part}");
        let mut unscaled: BigInt = digits.parse().unwrap_or_else(|_| BigInt::from(0));
        if negative {
            unscaled = -unscaled;
        }
        let mut scale = frac_part.len() as i32;
        if let Some(exp) = exp_part {
            let exp: i32 = exp.parse().map_err(|_| CompileError::at(ErrorKind::InvalidNumber, loc.clone(), "invalid exponent"))?;
            scale -= exp;
        }
        return Ok(Value::BigDecimal { unscaled, scale });
    }

    let mut text = format!("{int_part}.{frac_part}");
    if let Some(exp) = exp_part {
        text.push('e');
        text.push_str(exp);
    }
    let mut value: f64 = text
        .parse()
        .map_err(|_| CompileError::at(ErrorKind::InvalidNumber, loc.clone(), format!("invalid float literal `{token}`")))?;
    if negative {
        value = -value;
    }
    Ok(Value::Float(value))
}

/// Collapses a `BigInt` into `Value::Int` when it fits in `i64` and the `N`
/// suffix was not present, matching Clojure's "smallest representation that
/// fits" integer reading.
fn shrink_bigint(value: BigInt, force_big: bool) -> Value {
    if !force_big {
        if let Ok(small) = i64::try_from(&value) {
            return Value::Int(small);
        }
    }
    Value::BigInt(value)
}

fn normalize_ratio(numerator: BigInt, denominator: BigInt) -> Value {
    use num_integer::Integer;
    let gcd = numerator.gcd(&denominator);
    let (mut n, mut d) = if gcd == BigInt::from(0) {
        (numerator, denominator)
    } else {
        (numerator / &gcd, denominator / &gcd)
    };
    if d < BigInt::from(0) {
        n = -n;
        d = -d;
    }
    if d == BigInt::from(1) {
        return shrink_bigint(n, false);
    }
    Value::Ratio(n, d)
}

/// Named character escapes recognized by `\name` literals (spec.md §4.1).
pub fn named_char(name: &str) -> Option<char> {
    Some(match name {
        "space" => ' ',
        "tab" => '\t',
        "newline" => '\n',
        "return" => '\r',
        "formfeed" => '\u{000C}',
        "backspace" => '\u{0008}',
        _ => {
            if let Some(hex) = name.strip_prefix("u+").or_else(|| name.strip_prefix("u")) {
                let code = u32::from_str_radix(hex, 16).ok()?;
                return char::from_u32(code);
            }
            return None;
        }
    })
}

/// Parses a `\uHHHH` escape body (already past the `u`) from a string-escape
/// context, consuming exactly four hex digits from `chars`.
pub fn parse_unicode_escape(chars: &mut impl Iterator<Item = char>) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..4 {
        let digit = chars.next()?.to_digit(16)?;
        code = code * 16 + digit;
    }
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::SourcePos;

    fn loc() -> CodeLoc {
        CodeLoc::new("t.clj".into(), SourcePos::START)
    }

    #[test]
    fn parses_plain_integer() {
        assert_eq!(parse_number("42", &loc()).unwrap(), Value::Int(42));
        assert_eq!(parse_number("-7", &loc()).unwrap(), Value::Int(-7));
    }

    #[test]
    fn parses_bigint_suffix() {
        match parse_number("9N", &loc()).unwrap() {
            Value::BigInt(b) => assert_eq!(b, BigInt::from(9)),
            other => panic!("expected BigInt, got {other:?}"),
        }
    }

    #[test]
    fn parses_ratio_in_lowest_terms() {
        assert_eq!(parse_number("4/2", &loc()).unwrap(), Value::Int(2));
        assert_eq!(parse_number("4/6", &loc()).unwrap(), Value::Ratio(BigInt::from(2), BigInt::from(3)));
    }

    #[test]
    fn parses_radix_integer() {
        assert_eq!(parse_number("2r1010", &loc()).unwrap(), Value::Int(10));
        assert_eq!(parse_number("16rFF", &loc()).unwrap(), Value::Int(255));
    }

    #[test]
    fn parses_float_and_bigdecimal() {
        assert_eq!(parse_number("1.5", &loc()).unwrap(), Value::Float(1.5));
        match parse_number("1.50M", &loc()).unwrap() {
            Value::BigDecimal { unscaled, scale } => {
                assert_eq!(unscaled, BigInt::from(150));
                assert_eq!(scale, 2);
            }
            other => panic!("expected BigDecimal, got {other:?}"),
        }
    }

    #[test]
    fn named_chars_resolve() {
        assert_eq!(named_char("newline"), Some('\n'));
        assert_eq!(named_char("u+0041"), Some('A'));
    }
}
