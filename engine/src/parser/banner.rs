//! OS classification of banner-plugin output.

use memtriage_core::OsCategory;

/// Classifies banner text into a coarse OS family.
///
/// Matching is case-insensitive and checked in priority order: Windows
/// markers, then Linux, then Darwin/macOS.
///
/// # Examples
///
/// ```
/// use memtriage_core::OsCategory;
/// use memtriage_engine::parser::classify_banners;
///
/// assert_eq!(classify_banners("Microsoft Windows"), OsCategory::Windows);
/// assert_eq!(classify_banners("Linux version 5.15.0-91-generic"), OsCategory::Linux);
/// assert_eq!(classify_banners("Darwin Kernel Version 21.6.0"), OsCategory::MacOs);
/// assert_eq!(classify_banners("zzzz"), OsCategory::Unknown);
/// ```
pub fn classify_banners(output: &str) -> OsCategory {
    let lower = output.to_lowercase();
    if lower.contains("windows") || lower.contains("microsoft") {
        OsCategory::Windows
    } else if lower.contains("linux") {
        OsCategory::Linux
    } else if lower.contains("darwin") || lower.contains("macos") {
        OsCategory::MacOs
    } else {
        OsCategory::Unknown
    }
}
