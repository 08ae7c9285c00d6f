//! Static outputs: district bar charts (SVG) and choropleth maps (HTML).

pub mod chart;
pub mod map;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// `<output_dir>/<city>.svg`
pub fn chart_path(output_dir: &Path, city: &str) -> PathBuf {
    output_dir.join(format!("{}.svg", city))
}

/// `<output_dir>/<city>_<category>.html`
pub fn map_path(output_dir: &Path, city: &str, category: &str) -> PathBuf {
    output_dir.join(format!("{}_{}.html", city, category))
}

pub fn write_document(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Wrote {:?} ({} bytes)", path, contents.len());
    Ok(())
}

/// Escape text for SVG/HTML element content and attribute values.
pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whole currency/area amount: 136691.4 → "136 691"
pub(crate) fn fmt_amount(x: f64) -> String {
    crate::utils::group_digits(x.round() as i64, ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml(r#"A & B <"c">"#), "A &amp; B &lt;&quot;c&quot;&gt;");
        assert_eq!(escape_xml("Фрунзенский"), "Фрунзенский");
    }

    #[test]
    fn test_fmt_amount() {
        assert_eq!(fmt_amount(136691.4), "136 691");
        assert_eq!(fmt_amount(999.0), "999");
        assert_eq!(fmt_amount(1_000_000.0), "1 000 000");
        assert_eq!(fmt_amount(-1234.0), "-1 234");
    }
}
