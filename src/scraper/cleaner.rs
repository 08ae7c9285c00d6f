//! Text → value conversions for scraped offer fields.

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a price-per-area label: drop the trailing unit and every whitespace
/// character (including the non-breaking spaces used as thousands separators).
/// "136 691 ₽/м²" → 136691.0
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim_end_matches(|c| matches!(c, '₽' | '/' | 'м' | '²'));
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Parse an area label: the first whitespace-separated token is the number.
/// "41.7 м²" → 41.7
pub fn parse_area(s: &str) -> Option<f64> {
    s.split_whitespace().next()?.replace(',', ".").parse().ok()
}

/// Pull (lat, lon) from the map-initialisation script that follows the map
/// container. The second comma-separated token is the latitude, the third one
/// (cut at the closing parenthesis) is the longitude:
/// `init('map', 59.8689334, 30.3854268);` → (59.8689334, 30.3854268)
///
/// No range check is made; both values or neither.
pub fn parse_coordinates(script: &str) -> Option<(f64, f64)> {
    let mut parts = script.split(',');
    let lat = parts.nth(1)?.trim().parse().ok()?;
    let lon = parts.next()?.split(')').next()?.trim().parse().ok()?;
    Some((lat, lon))
}

/// Trimmed text, or `None` when nothing is left.
pub fn clean_text(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// District label used for charts: "Фрунзенский район" → "Фрунзенский".
pub fn normalise_district(s: &str) -> String {
    s.replace("район", "").trim().to_string()
}

/// The offer id is the last path segment of its link.
/// "https://www.realtymag.ru/kvartira/prodazha/2517553691" → "2517553691"
pub fn offer_id_from_link(link: &str) -> Option<String> {
    let path = link.split(['?', '#']).next()?;
    clean_text(path.trim_end_matches('/').rsplit('/').next()?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("136 691 ₽/м²"), Some(136691.0));
        assert_eq!(parse_price("136\u{a0}691\u{a0}₽/м²"), Some(136691.0));
        assert_eq!(parse_price("  98000 "), Some(98000.0));
        assert_eq!(parse_price("₽/м²"), None);
        assert_eq!(parse_price("по запросу"), None);
    }

    #[test]
    fn test_parse_area() {
        assert_eq!(parse_area("41.7 м²"), Some(41.7));
        assert_eq!(parse_area("41,7 м²"), Some(41.7));
        assert_eq!(parse_area(""), None);
    }

    #[test]
    fn test_parse_coordinates() {
        assert_eq!(
            parse_coordinates("initMap('offer-map', 59.8689334, 30.3854268);"),
            Some((59.8689334, 30.3854268))
        );
        assert_eq!(parse_coordinates("initMap('offer-map')"), None);
        assert_eq!(parse_coordinates("a, b, c)"), None);
    }

    #[test]
    fn test_normalise_district() {
        assert_eq!(normalise_district(" Фрунзенский район "), "Фрунзенский");
        assert_eq!(normalise_district("Центральный"), "Центральный");
    }

    #[test]
    fn test_offer_id_from_link() {
        assert_eq!(
            offer_id_from_link("https://www.realtymag.ru/kvartira/prodazha/2517553691"),
            Some("2517553691".to_string())
        );
        assert_eq!(
            offer_id_from_link("/novostroyka/prodazha/42/?ref=list"),
            Some("42".to_string())
        );
        assert_eq!(offer_id_from_link(""), None);
    }
}
