use crate::models::OfferFields;
use crate::scraper::cleaner::{clean_text, parse_area, parse_coordinates, parse_price};
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use url::Url;

// ── Listing page ──────────────────────────────────────────────────────────────

/// Offer links from one search-results page, resolved against `base`.
pub fn parse_offer_links(html: &str, base: &Url) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);

    let link_sel = Selector::parse("div.offer__headline a")
        .map_err(|e| anyhow::anyhow!("link selector: {:?}", e))?;

    let links = doc
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .map(|url| url.to_string())
        .collect();

    Ok(links)
}

// ── Offer page ────────────────────────────────────────────────────────────────

const AREA_SEL: &str =
    "div.offer-detail__section-item.section_type_full-square div.offer-detail__section-item-body";
const DISTRICT_SEL: &str = "div.offer-detail__sublocality";
const PRICE_SEL: &str = "div.offer-detail__price-per-square-rur";
const REFRESH_SEL: &str = "div.offer-detail__refresh";
const MAP_CLASS: &str = "offer-detail__map";

/// Extract the offer fields. A missing or malformed field becomes `None`
/// without affecting the others.
pub fn parse_offer_page(html: &str) -> OfferFields {
    let doc = Html::parse_document(html);

    let coordinates = map_script(&doc).and_then(|script| parse_coordinates(&script));

    OfferFields {
        living_area: first_text(&doc, AREA_SEL).and_then(|s| parse_area(&s)),
        district: first_text(&doc, DISTRICT_SEL).and_then(|s| clean_text(&s)),
        price_per_area: first_text(&doc, PRICE_SEL).and_then(|s| parse_price(&s)),
        latitude: coordinates.map(|(lat, _)| lat),
        longitude: coordinates.map(|(_, lon)| lon),
        refresh_time: first_text(&doc, REFRESH_SEL).and_then(|s| clean_text(&s)),
    }
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    Some(el.text().collect())
}

/// Text of the first `<script>` following the map container in document order.
fn map_script(doc: &Html) -> Option<String> {
    let mut seen_map = false;
    for node in doc.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else { continue };
        if !seen_map {
            seen_map = el.value().name() == "div" && el.value().classes().any(|c| c == MAP_CLASS);
        } else if el.value().name() == "script" {
            return Some(el.text().collect());
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
