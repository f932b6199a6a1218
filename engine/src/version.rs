//! Version extraction from tool probe output.

use regex::Regex;

const VERSION_PATTERN: &str = r"(?x)
    \b
    v?                                 # optional 'v' prefix
    (\d{1,4}\.\d{1,4}(?:\.\d{1,6})?)   # major.minor[.patch]
    ([-+][a-zA-Z0-9._+-]*)?            # optional pre-release / build
    \b
";

/// Extracts a version string from `--help`/`-ver` style output.
///
/// Lines mentioning a version keyword or the tool name are preferred; the
/// first dotted number found otherwise. Returns `None` when the text holds
/// no dotted version number.
///
/// # Examples
///
/// ```
/// use memtriage_engine::version::extract_version;
///
/// assert_eq!(extract_version("12.76\n", "exiftool").as_deref(), Some("12.76"));
/// assert_eq!(
///     extract_version("Volatility 3 Framework 2.5.2\nusage: vol ...", "volatility").as_deref(),
///     Some("2.5.2"),
/// );
/// assert_eq!(extract_version("no digits here", "binwalk"), None);
/// ```
pub fn extract_version(text: &str, tool_name: &str) -> Option<String> {
    let version_re = Regex::new(VERSION_PATTERN).ok()?;
    let tool_lower = tool_name.to_ascii_lowercase();

    let mut best: Option<(String, u8)> = None;
    for line in text.lines().take(20) {
        let line_lower = line.to_ascii_lowercase();
        let mut score = 0;
        if line_lower.contains("version") || line_lower.contains("framework") {
            score += 2;
        }
        if line_lower.contains(&tool_lower) {
            score += 1;
        }

        for cap in version_re.captures_iter(line) {
            let Some(full) = cap.get(0) else { continue };
            // Reject dotted quads and paths
            if line[full.end()..].starts_with('.') {
                continue;
            }
            if full.start() > 0 && matches!(line.as_bytes()[full.start() - 1], b'/' | b'\\') {
                continue;
            }
            let candidate = full.as_str().trim_start_matches('v').to_string();
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((candidate, score));
            }
        }
    }

    best.map(|(version, _)| version)
}
