//! Formatting and parsing helpers for CLI output and flags.

const UNITS: [(&str, u64); 4] = [
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
];

/// Format bytes as human-readable string.
///
/// # Examples
///
/// ```
/// use sk_cli_common::format_bytes;
///
/// assert_eq!(format_bytes(500), "500 bytes");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(5 * 1024 * 1024 - 10 * 1024), "4.99 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    UNITS
        .iter()
        .find(|(_, size)| bytes >= *size)
        .map(|(unit, size)| format!("{:.2} {unit}", bytes as f64 / *size as f64))
        .unwrap_or_else(|| format!("{bytes} bytes"))
}

/// Format a large number with commas for readability.
///
/// ```
/// use sk_cli_common::format_number;
///
/// assert_eq!(format_number(1234567), "1,234,567");
/// ```
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Parse a byte size such as `4096`, `512K`, `1MiB` or `2G`.
///
/// `K`/`M`/`G` and their `Ki`/`Mi`/`Gi` forms are binary multiples; a
/// trailing `B` is optional.
///
/// ```
/// use sk_cli_common::parse_byte_size;
///
/// assert_eq!(parse_byte_size("1M").unwrap(), 1 << 20);
/// assert_eq!(parse_byte_size("64KiB").unwrap(), 64 * 1024);
/// ```
pub fn parse_byte_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let value: usize = number
        .parse()
        .map_err(|_| format!("'{s}' is not a valid byte size"))?;

    let suffix = suffix.trim().to_ascii_uppercase();
    let suffix = suffix.strip_suffix('B').unwrap_or(&suffix);
    let suffix = suffix.strip_suffix('I').unwrap_or(suffix);
    let multiplier: usize = match suffix {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        other => return Err(format!("unknown size suffix '{other}' in '{s}'")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{s}' is too large"))
}
