// src/calculator/parse.rs

use chrono::{NaiveDate, NaiveDateTime};

use super::record::Decimal;

/// Largest mantissa width an i128 holds without overflow checks.
const MAX_DIGITS: usize = 38;

/// Trim surrounding whitespace.
pub fn clean_str(raw: &str) -> &str {
    raw.trim()
}

/// Parse a plain decimal literal: optional sign, digits, optional fraction.
/// `thousands` separators may only group the integer digits in threes.
/// Exponents, bare separators and empty strings are refused.
pub fn parse_decimal(s: &str, decimal_sep: char, thousands: Option<char>) -> Option<Decimal> {
    let s = clean_str(s);
    let (negative, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (int_part, frac_part) = match body.split_once(decimal_sep) {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };

    let mut digits = ungroup(int_part, thousands)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let scale = match frac_part {
        Some(f) => {
            if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits.push_str(f);
            f.len()
        }
        None => 0,
    };

    if digits.is_empty() || digits.len() > MAX_DIGITS || scale > usize::from(u8::MAX) {
        return None;
    }
    let magnitude: i128 = digits.parse().ok()?;
    let mantissa = if negative { -magnitude } else { magnitude };
    Some(Decimal::new(mantissa, scale as u8))
}

/// Remove digit grouping from the integer part of a number. The leading
/// group holds one to three characters and every later group exactly three,
/// so `1,234,567` is accepted while `1,5` and `12,34` are not.
fn ungroup(int_part: &str, thousands: Option<char>) -> Option<String> {
    let Some(sep) = thousands.filter(|sep| int_part.contains(*sep)) else {
        return Some(int_part.to_string());
    };
    let mut groups = int_part.split(sep);
    let mut out = String::with_capacity(int_part.len());
    let lead = groups.next()?;
    if !(1..=3).contains(&lead.chars().count()) {
        return None;
    }
    out.push_str(lead);
    for group in groups {
        if group.chars().count() != 3 {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}

/// Parse an integer literal. `"7.00"` is accepted, `"7.5"` is not.
pub fn parse_integer(s: &str, decimal_sep: char, thousands: Option<char>) -> Option<i64> {
    let d = parse_decimal(s, decimal_sep, thousands)?.rescale(0)?;
    i64::try_from(d.mantissa).ok()
}

/// Parse a finite float, honouring the configured separators. Grouping is
/// checked as for decimals and a separator never appears after the
/// decimal point or in the exponent.
pub fn parse_float(s: &str, decimal_sep: char, thousands: Option<char>) -> Option<f64> {
    let s = clean_str(s);
    let (sign, body) = match s.as_bytes().first()? {
        b'-' | b'+' => s.split_at(1),
        _ => ("", s),
    };
    let (int_part, rest) = match body.split_once(decimal_sep) {
        Some((i, r)) => (i, Some(r)),
        None => (body, None),
    };
    let (int_part, exponent) = match rest {
        Some(_) => (int_part, None),
        None => match int_part.find(['e', 'E']) {
            Some(at) => (&int_part[..at], Some(&int_part[at..])),
            None => (int_part, None),
        },
    };

    let mut normalized = String::with_capacity(s.len());
    normalized.push_str(sign);
    normalized.push_str(&ungroup(int_part, thousands)?);
    for tail in [rest, exponent].into_iter().flatten() {
        if thousands.is_some_and(|sep| tail.contains(sep)) {
            return None;
        }
    }
    if let Some(r) = rest {
        normalized.push('.');
        normalized.push_str(r);
    }
    if let Some(e) = exponent {
        normalized.push_str(e);
    }
    let points = normalized.matches('.').count();
    if decimal_sep != '.' && points > usize::from(rest.is_some()) {
        // a '.' that is not the configured decimal separator
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match clean_str(s).to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_date(s: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(clean_str(s), format).ok()
}

pub fn parse_datetime(s: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(clean_str(s), format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("10.50", '.', None), Some(Decimal::new(1050, 2)));
        assert_eq!(parse_decimal(" -3 ", '.', None), Some(Decimal::new(-3, 0)));
        assert_eq!(parse_decimal("+.5", '.', None), Some(Decimal::new(5, 1)));
        assert_eq!(
            parse_decimal("1.234,56", ',', Some('.')),
            Some(Decimal::new(123456, 2))
        );
        assert_eq!(parse_decimal("1,234", '.', Some(',')), Some(Decimal::new(1234, 0)));

        assert_eq!(
            parse_decimal("-12,345,678.9", '.', Some(',')),
            Some(Decimal::new(-123456789, 1))
        );

        for bad in [
            "", "-", "1.", "1e3", "abc", "1..2", ",100", "100,", "1,,0", "1.2.3", "1,5", "12,34",
            "1234,567", "1.2,3", "1,000.00,0",
        ] {
            assert_eq!(parse_decimal(bad, '.', Some(',')), None, "{bad:?}");
        }
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("1", '.', None), Some(1));
        assert_eq!(parse_integer("7.00", '.', None), Some(7));
        assert_eq!(parse_integer("7.5", '.', None), None);
        assert_eq!(parse_integer("x", '.', None), None);
        assert_eq!(parse_integer("99999999999999999999", '.', None), None);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("-23.5", '.', None), Some(-23.5));
        assert_eq!(parse_float("1e3", '.', None), Some(1000.0));
        assert_eq!(parse_float("2,5", ',', None), Some(2.5));
        assert_eq!(parse_float("inf", '.', None), None);
        assert_eq!(parse_float("NaN", '.', None), None);

        assert_eq!(parse_float("1,234.5", '.', Some(',')), Some(1234.5));
        assert_eq!(parse_float("-1.234,5", ',', Some('.')), Some(-1234.5));
        assert_eq!(parse_float("12e2", '.', Some(',')), Some(1200.0));
        for bad in ["1,5", "12,34", "1.2,3", "1e3,0", ",5", "1,000,"] {
            assert_eq!(parse_float(bad, '.', Some(',')), None, "{bad:?}");
        }
        // a dot is not a decimal point when the separator is a comma
        assert_eq!(parse_float("2.5", ',', None), None);
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_date("2017-10-02", "%Y-%m-%d"),
            NaiveDate::from_ymd_opt(2017, 10, 2)
        );
        assert_eq!(parse_date("02/10/2017", "%Y-%m-%d"), None);
        let dt = parse_datetime("2017-10-02 10:56:33", "%Y-%m-%d %H:%M:%S");
        assert_eq!(
            dt,
            NaiveDate::from_ymd_opt(2017, 10, 2).and_then(|d| d.and_hms_opt(10, 56, 33))
        );
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
