//! Argument-parsing helpers available to command callbacks.
//!
//! These are small, pure functions, ported from `PshellServer.py`'s public
//! helper surface (`isSubString`, `isDec`, `getInt`, ...). Callbacks receive
//! raw `&str` tokens and use these to validate/convert them instead of
//! reaching for a heavier parsing crate.

/// Radix hint for [`get_int`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    Dec,
    Hex,
    Any,
}

/// True if `string1` is a non-empty prefix of `string2`, with an optional
/// caller-supplied minimum match length.
///
/// This is the single primitive shared by command-name lookup (registry)
/// and TAB-completion keyword matching (line editor):
/// - an empty `string1` never matches
/// - `string1` longer than `string2` never matches
/// - `min_match_length == 0` means "match any non-empty prefix" (full
///   `string1`-length compare)
/// - when `string1` is already longer than `min_match_length`, the compare
///   still runs over the full `string1` length (a longer typed prefix is
///   always honored)
/// - otherwise, the compare runs over exactly `min_match_length` characters
pub fn is_sub_string(string1: &str, string2: &str, min_match_length: usize) -> bool {
    is_sub_string_impl(string1, string2, min_match_length, false)
}

/// Case-insensitive variant of [`is_sub_string`].
pub fn is_sub_string_no_case(string1: &str, string2: &str, min_match_length: usize) -> bool {
    is_sub_string_impl(string1, string2, min_match_length, true)
}

fn is_sub_string_impl(string1: &str, string2: &str, min_match_length: usize, no_case: bool) -> bool {
    if string1.is_empty() {
        return false;
    }
    let len1 = string1.chars().count();
    let len2 = string2.chars().count();
    if len1 > len2 {
        return false;
    }
    let compare_len = if min_match_length == 0 {
        len1
    } else if len1 > min_match_length {
        len1
    } else {
        min_match_length
    };
    if compare_len > len1 {
        // string1 is shorter than the required comparison window.
        return false;
    }
    let prefix2: String = string2.chars().take(compare_len.min(len2)).collect();
    let prefix1: String = string1.chars().take(compare_len).collect();
    if no_case {
        prefix1.eq_ignore_ascii_case(&prefix2)
    } else {
        prefix1 == prefix2
    }
}

/// True if every char is an ASCII alphabetic letter.
pub fn is_alpha(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// True if every char is an ASCII letter or digit.
pub fn is_alpha_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// True if `s` parses as a decimal integer (optional leading `-`/`+`).
pub fn is_dec(s: &str) -> bool {
    !s.is_empty() && s.trim_start_matches(['+', '-']).chars().all(|c| c.is_ascii_digit())
        && !s.trim_start_matches(['+', '-']).is_empty()
}

/// True if `s` is a `0x`/`0X`-prefixed hex literal, or bare hex digits.
pub fn is_hex(s: &str) -> bool {
    let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

/// True if `s` is decimal or hex (per [`is_dec`]/[`is_hex`]).
pub fn is_numeric(s: &str) -> bool {
    is_dec(s) || is_hex(s)
}

/// True if `s` parses as a float.
pub fn is_float(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok()
}

/// True if `s` is a well-formed dotted-quad IPv4 address.
pub fn is_ipv4_addr(s: &str) -> bool {
    s.parse::<std::net::Ipv4Addr>().is_ok()
}

/// True if `s` is `a.b.c.d/prefix` with `prefix` in `0..=32`, or a plain
/// dotted-quad address (netmask optional).
pub fn is_ipv4_addr_with_netmask(s: &str) -> bool {
    match s.split_once('/') {
        Some((addr, prefix)) => {
            is_ipv4_addr(addr) && prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false)
        }
        None => is_ipv4_addr(s),
    }
}

/// True if `s` is a colon- or dash-separated 6-octet MAC address.
pub fn is_mac_addr(s: &str) -> bool {
    let sep = if s.contains(':') { ':' } else if s.contains('-') { '-' } else { return false };
    let parts: Vec<&str> = s.split(sep).collect();
    parts.len() == 6 && parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parses `true`/`false`/`yes`/`no`/`1`/`0` (case-insensitive).
pub fn get_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Parses an integer under the given radix hint. `Radix::Any` tries decimal
/// first, then a `0x`-prefixed or bare hex literal.
pub fn get_int(s: &str, radix: Radix) -> Option<i64> {
    match radix {
        Radix::Dec => s.parse::<i64>().ok(),
        Radix::Hex => {
            let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
            i64::from_str_radix(stripped, 16).ok()
        }
        Radix::Any => s
            .parse::<i64>()
            .ok()
            .or_else(|| get_int(s, Radix::Hex)),
    }
}

pub fn get_float(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

/// Finds the value following `option` in `args`, where tokens are of the
/// form `option=value`, returning `None` if `option` isn't present.
pub fn get_option<'a>(args: &'a [String], option: &str) -> Option<&'a str> {
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            if key == option {
                return Some(value);
            }
        }
    }
    None
}

/// Splits a command line into whitespace-delimited tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_string_prefix_rules() {
        assert!(is_sub_string("he", "help", 0));
        assert!(!is_sub_string("", "help", 0));
        assert!(!is_sub_string("helpme", "help", 0));
        assert!(is_sub_string("help", "help", 0));
        assert!(!is_sub_string("he", "hel", 3));
    }

    #[test]
    fn numeric_helpers() {
        assert!(is_dec("-42"));
        assert!(!is_dec("4.2"));
        assert!(is_hex("0xFF"));
        assert!(is_hex("ff"));
        assert!(is_numeric("123"));
        assert!(is_float("3.14"));
    }

    #[test]
    fn ipv4_and_mac() {
        assert!(is_ipv4_addr("192.168.1.1"));
        assert!(!is_ipv4_addr("192.168.1.256"));
        assert!(is_ipv4_addr_with_netmask("192.168.1.0/24"));
        assert!(is_mac_addr("aa:bb:cc:dd:ee:ff"));
        assert!(!is_mac_addr("aa:bb:cc:dd:ee"));
    }

    #[test]
    fn bool_and_option() {
        assert_eq!(get_bool("yes"), Some(true));
        assert_eq!(get_bool("nope"), None);
        let args = vec!["rate=9600".to_string(), "mode=raw".to_string()];
        assert_eq!(get_option(&args, "mode"), Some("raw"));
        assert_eq!(get_option(&args, "missing"), None);
    }
}
