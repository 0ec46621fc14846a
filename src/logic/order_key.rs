//! Order-key codec.
//!
//! Integer-like order keys are zero-padded to a fixed width before storage so
//! that the datastore's text ordering agrees with numeric ordering
//! (`"0000000002" < "0000000010"`). Everything else is stored verbatim.
//!
//! Limits of the scheme:
//! - integers with more than [`ORDER_KEY_WIDTH`] digits are stored unpadded and
//!   therefore sort lexicographically against padded ones;
//! - negative integers keep their sign in front of the padding, so they sort
//!   before non-negative keys but not numerically among themselves.

use serde_json::Value;

pub const ORDER_KEY_WIDTH: usize = 10;

/// Split an optional minus sign off an all-digit string.
fn integer_parts(raw: &str) -> Option<(bool, &str)> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some((negative, digits))
    } else {
        None
    }
}

/// Encode a client-supplied order key for storage. `null` stores nothing.
pub fn encode_order_key(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::String(s) => Some(encode_str(s)),
        other => Some(encode_str(&other.to_string())),
    }
}

pub fn encode_str(raw: &str) -> String {
    match integer_parts(raw) {
        Some((negative, digits)) => {
            let padded = format!("{:0>width$}", digits, width = ORDER_KEY_WIDTH);
            if negative {
                format!("-{}", padded)
            } else {
                padded
            }
        }
        None => raw.to_string(),
    }
}

/// Reverse [`encode_str`] for display. Only exact-width padded integers are
/// touched; `"0000000000"` and `"-0000000000"` both decode to `"0"`.
pub fn decode_order_key(stored: &str) -> String {
    match integer_parts(stored) {
        Some((negative, digits)) if digits.len() == ORDER_KEY_WIDTH => {
            let trimmed = digits.trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else if negative {
                format!("-{}", trimmed)
            } else {
                trimmed.to_string()
            }
        }
        _ => stored.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(raw: Value) -> Option<String> {
        encode_order_key(&raw).map(|stored| decode_order_key(&stored))
    }

    #[test]
    fn pads_integers_to_fixed_width() {
        assert_eq!(encode_order_key(&json!(2)).as_deref(), Some("0000000002"));
        assert_eq!(encode_order_key(&json!("10")).as_deref(), Some("0000000010"));
        assert_eq!(encode_order_key(&json!(-5)).as_deref(), Some("-0000000005"));
        assert_eq!(encode_order_key(&Value::Null), None);
        assert!(encode_str("2") < encode_str("10"));
    }

    #[test]
    fn integers_round_trip_to_canonical_form() {
        assert_eq!(round_trip(json!(42)).as_deref(), Some("42"));
        assert_eq!(round_trip(json!(0)).as_deref(), Some("0"));
        assert_eq!(round_trip(json!(-17)).as_deref(), Some("-17"));
        assert_eq!(round_trip(json!("-0")).as_deref(), Some("0"));
        assert_eq!(round_trip(json!("007")).as_deref(), Some("7"));
        assert_eq!(round_trip(json!(9_999_999_999i64)).as_deref(), Some("9999999999"));
    }

    #[test]
    fn keys_wider_than_the_pad_pass_through() {
        let wide = json!(12_345_678_901i64);
        assert_eq!(encode_order_key(&wide).as_deref(), Some("12345678901"));
        assert_eq!(round_trip(wide).as_deref(), Some("12345678901"));
    }

    #[test]
    fn non_numeric_keys_are_fixed_points() {
        for raw in ["a", "b-1", "1.5", "-", "", "12a", " 3"] {
            assert_eq!(encode_str(raw), raw);
            assert_eq!(decode_order_key(raw), raw);
        }
        assert_eq!(round_trip(json!(1.5)).as_deref(), Some("1.5"));
    }
}
