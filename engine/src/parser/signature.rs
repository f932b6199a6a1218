//! Signature-table decoding for scanner stdout.

use memtriage_core::SignatureFinding;

/// Decodes the scanner's `DECIMAL  HEXADECIMAL  DESCRIPTION` table.
///
/// Header and separator lines are skipped, as is any line that does not
/// have three columns or whose first column is not a decimal integer.
/// Findings keep the order the scanner printed them in.
///
/// # Examples
///
/// ```
/// use memtriage_engine::parser::parse_signature_table;
///
/// let stdout = "\nDECIMAL       HEXADECIMAL     DESCRIPTION\n\
///               --------------------------------------------------------------------------------\n\
///               0             0x0             PNG image, 1920 x 1080\n";
/// let findings = parse_signature_table(stdout);
/// assert_eq!(findings.len(), 1);
/// assert_eq!(findings[0].offset, 0);
/// assert_eq!(findings[0].offset_hex, "0x0");
/// assert_eq!(findings[0].description, "PNG image, 1920 x 1080");
/// ```
pub fn parse_signature_table(stdout: &str) -> Vec<SignatureFinding> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("DECIMAL") && !line.starts_with("---"))
        .filter_map(split_columns)
        .filter_map(|(decimal, hex, description)| {
            let offset = decimal.parse::<u64>().ok()?;
            Some(SignatureFinding {
                offset,
                offset_hex: hex.to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}

/// Splits on the first two whitespace runs; the rest is the description.
fn split_columns(line: &str) -> Option<(&str, &str, &str)> {
    let (first, rest) = line.split_once(char::is_whitespace)?;
    let (second, rest) = rest.trim_start().split_once(char::is_whitespace)?;
    let third = rest.trim();
    if third.is_empty() {
        return None;
    }
    Some((first, second, third))
}
