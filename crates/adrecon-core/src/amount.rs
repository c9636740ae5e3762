use crate::record::CellValue;

const STRIPPED_SYMBOLS: &[char] = &['€', '$', '£', '¥', '₹', '₽', '₩', '₺', '¢', '%'];

/// Parses a monetary or count value from an export cell.
///
/// Numbers pass through when finite. Text is cleaned of currency symbols and
/// whitespace (including non-breaking spaces); the last `.` or `,` is taken as
/// the decimal separator and earlier separators must group thousands. Text
/// with any other character (times, ISO dates, words) yields `0.0`, as does
/// anything else that cannot be read.
pub fn parse_amount(raw: &CellValue) -> f64 {
    match raw {
        CellValue::Number(n) => finite_or_zero(*n),
        CellValue::Text(s) => parse_amount_str(s),
        CellValue::Null | CellValue::Bool(_) | CellValue::Other(_) => 0.0,
    }
}

pub fn parse_amount_str(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED_SYMBOLS.contains(c))
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }
    if is_plain_decimal(&cleaned) {
        return parse_finite(&cleaned);
    }

    let (sign, body) = match cleaned.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", cleaned.as_str()),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return 0.0;
    }
    let Some(idx) = body.rfind(['.', ',']) else {
        return parse_finite(&format!("{sign}{body}"));
    };
    let (integer, fraction) = (&body[..idx], &body[idx + 1..]);
    if !is_grouped(integer) {
        return 0.0;
    }
    let integer: String = integer.chars().filter(char::is_ascii_digit).collect();
    parse_finite(&format!("{sign}{integer}.{fraction}"))
}

/// Thousands grouping before the decimal separator: a leading run of digits,
/// then groups of exactly three. `05.12` in `05.12.2025` is not grouping.
fn is_grouped(integer: &str) -> bool {
    let mut groups = integer.split(['.', ',']);
    let lead = groups.next().unwrap_or_default();
    let rest: Vec<&str> = groups.collect();
    if rest.is_empty() {
        return true;
    }
    !lead.is_empty() && rest.iter().all(|group| group.len() == 3)
}

/// `-?\d+(\.\d+)?`
fn is_plain_decimal(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = match body.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (body, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

fn parse_finite(s: &str) -> f64 {
    s.parse::<f64>().map(finite_or_zero).unwrap_or(0.0)
}

fn finite_or_zero(n: f64) -> f64 {
    if n.is_finite() {
        // folds -0.0 into 0.0
        n + 0.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn eu_and_us_forms_agree() {
        let pairs = [
            ("8.273,54", "8,273.54"),
            ("1.234.567,89", "1,234,567.89"),
            ("€ 4.128,94", "$4,128.94"),
            ("12,5", "12.5"),
        ];
        for (eu, us) in pairs {
            let a = parse_amount_str(eu);
            let b = parse_amount_str(us);
            assert!(close(a, b), "{eu} -> {a}, {us} -> {b}");
        }
        assert!(close(parse_amount_str("8.273,54"), 8273.54));
    }

    #[test]
    fn strips_currency_and_non_breaking_spaces() {
        assert!(close(parse_amount_str("1\u{a0}234,00\u{a0}€"), 1234.0));
        assert!(close(parse_amount_str("2\u{202f}500 £"), 2500.0));
        assert!(close(parse_amount_str("12%"), 12.0));
    }

    #[test]
    fn plain_and_negative_values() {
        assert!(close(parse_amount_str("-42.5"), -42.5));
        assert!(close(parse_amount_str("17"), 17.0));
        assert!(close(parse_amount_str("-1.200,75"), -1200.75));
    }

    #[test]
    fn single_separator_is_decimal() {
        assert!(close(parse_amount_str("1.234"), 1.234));
        assert!(close(parse_amount_str("1,234"), 1.234));
    }

    #[test]
    fn unreadable_input_yields_zero() {
        for raw in ["", "   ", "n/a", "-", "abc.def", "NaN", "inf"] {
            assert_eq!(parse_amount_str(raw), 0.0, "{raw:?}");
        }
        assert_eq!(parse_amount(&CellValue::Null), 0.0);
        assert_eq!(parse_amount(&CellValue::Bool(true)), 0.0);
        assert_eq!(parse_amount(&CellValue::Number(f64::NAN)), 0.0);
        assert_eq!(parse_amount(&CellValue::Number(f64::INFINITY)), 0.0);
    }

    #[test]
    fn times_dates_and_mixed_text_yield_zero() {
        for raw in ["12:30", "abc123", "2025-12-05", "05.12.2025", "12/05/2025", "1.2.3", "12-30", "EUR12x"] {
            assert_eq!(parse_amount_str(raw), 0.0, "{raw:?}");
        }
        assert!(close(parse_amount_str(".5"), 0.5));
        assert!(close(parse_amount_str("1.234.567"), 1234.567));
    }

    #[test]
    fn numbers_pass_through() {
        assert_eq!(parse_amount(&CellValue::Number(99.5)), 99.5);
        assert_eq!(parse_amount(&CellValue::Number(-0.0)).to_bits(), 0.0f64.to_bits());
    }
}
