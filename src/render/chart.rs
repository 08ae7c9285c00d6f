//! District bar charts: mean price per area and mean living area, one row of
//! two panels per listing category.

use super::{escape_xml, fmt_amount};
use crate::models::Offer;
use crate::scraper::cleaner::normalise_district;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct DistrictStat {
    pub district: String,
    pub mean_price: Option<f64>,
    pub mean_area: Option<f64>,
}

/// Per-district means, sorted by district name. Price and area are averaged
/// independently over the offers that have each one.
pub fn district_means(offers: &[Offer]) -> Vec<DistrictStat> {
    #[derive(Default)]
    struct Acc {
        price: (f64, usize),
        area: (f64, usize),
    }

    let mut by_district: BTreeMap<String, Acc> = BTreeMap::new();
    for offer in offers {
        let Some(district) = offer.district.as_deref().map(normalise_district) else { continue };
        if district.is_empty() {
            continue;
        }
        let acc = by_district.entry(district).or_default();
        if let Some(p) = offer.price_per_area {
            acc.price.0 += p;
            acc.price.1 += 1;
        }
        if let Some(a) = offer.living_area {
            acc.area.0 += a;
            acc.area.1 += 1;
        }
    }

    let mean = |(sum, n): (f64, usize)| (n > 0).then(|| sum / n as f64);
    by_district
        .into_iter()
        .map(|(district, acc)| DistrictStat {
            district,
            mean_price: mean(acc.price),
            mean_area: mean(acc.area),
        })
        .collect()
}

/// One category's statistics, labelled for the chart.
pub struct ChartRow<'a> {
    pub label: &'a str,
    pub stats: &'a [DistrictStat],
}

const PANEL_W: f64 = 640.0;
const PANEL_H: f64 = 420.0;
const MARGIN_LEFT: f64 = 90.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 150.0;
const TITLE_H: f64 = 60.0;
const BAR_FILL: &str = "#4c72b0";

/// Render the whole chart as a standalone SVG document.
pub fn render_chart(city_name: &str, rows: &[ChartRow<'_>]) -> String {
    let width = 2.0 * (PANEL_W + MARGIN_LEFT);
    let row_h = PANEL_H + MARGIN_TOP + MARGIN_BOTTOM;
    let height = TITLE_H + row_h * rows.len() as f64;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
        w = width,
        h = height
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="40" font-size="28" text-anchor="middle">{}</text>"#,
        width / 2.0,
        escape_xml(city_name)
    );

    for (i, row) in rows.iter().enumerate() {
        let y0 = TITLE_H + row_h * i as f64;
        let prices: Vec<(&str, f64)> = row
            .stats
            .iter()
            .filter_map(|s| s.mean_price.map(|v| (s.district.as_str(), v)))
            .collect();
        let areas: Vec<(&str, f64)> = row
            .stats
            .iter()
            .filter_map(|s| s.mean_area.map(|v| (s.district.as_str(), v)))
            .collect();

        panel(&mut svg, 0.0, y0, row.label, "Цена за квадратный метр, ₽/м²", &prices);
        panel(&mut svg, PANEL_W + MARGIN_LEFT, y0, row.label, "Площадь, м²", &areas);
    }

    svg.push_str("</svg>\n");
    svg
}

fn panel(svg: &mut String, x0: f64, y0: f64, title: &str, y_label: &str, bars: &[(&str, f64)]) {
    let left = x0 + MARGIN_LEFT;
    let top = y0 + MARGIN_TOP;
    let bottom = top + PANEL_H;

    let _ = writeln!(svg, r#"<g class="panel">"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" font-size="18" font-weight="bold">{}</text>"#,
        left,
        top - 12.0,
        escape_xml(title)
    );
    let _ = writeln!(
        svg,
        r#"<text transform="translate({},{}) rotate(-90)" font-size="13" text-anchor="middle">{}</text>"#,
        x0 + 18.0,
        top + PANEL_H / 2.0,
        escape_xml(y_label)
    );
    let _ = writeln!(
        svg,
        r##"<line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="#333"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="#333"/>"##,
        l = left,
        r = left + PANEL_W,
        t = top,
        b = bottom
    );

    let max = bars.iter().map(|&(_, v)| v).fold(0.0_f64, f64::max);
    if bars.is_empty() || max <= 0.0 {
        let _ = writeln!(
            svg,
            r##"<text x="{}" y="{}" font-size="14" text-anchor="middle" fill="#888">нет данных</text>"##,
            left + PANEL_W / 2.0,
            top + PANEL_H / 2.0
        );
        let _ = writeln!(svg, "</g>");
        return;
    }

    for tick in 0..=4 {
        let value = max * tick as f64 / 4.0;
        let y = bottom - PANEL_H * tick as f64 / 4.0;
        let _ = writeln!(
            svg,
            r##"<text x="{}" y="{}" font-size="11" text-anchor="end">{}</text><line x1="{}" y1="{y}" x2="{}" y2="{y}" stroke="#ddd"/>"##,
            left - 6.0,
            y + 4.0,
            fmt_amount(value),
            left,
            left + PANEL_W,
            y = y
        );
    }

    let slot = PANEL_W / bars.len() as f64;
    for (i, &(district, value)) in bars.iter().enumerate() {
        let h = PANEL_H * value / max;
        let x = left + slot * i as f64;
        let _ = writeln!(
            svg,
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"><title>{}: {}</title></rect>"#,
            x + slot * 0.1,
            bottom - h,
            slot * 0.8,
            h,
            BAR_FILL,
            escape_xml(district),
            fmt_amount(value)
        );
        let _ = writeln!(
            svg,
            r#"<text transform="translate({:.2},{}) rotate(-90)" font-size="11" text-anchor="end">{}</text>"#,
            x + slot / 2.0 + 4.0,
            bottom + 8.0,
            escape_xml(district)
        );
    }
    let _ = writeln!(svg, "</g>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn offer(district: Option<&str>, price: Option<f64>, area: Option<f64>) -> Offer {
        Offer {
            offer_id: "1".into(),
            city: "SPb".into(),
            category: "sec".into(),
            price_per_area: price,
            living_area: area,
            district: district.map(String::from),
            latitude: None,
            longitude: None,
            refresh_time: None,
            scraped_at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_district_means() {
        let offers = [
            offer(Some("Фрунзенский район"), Some(100.0), Some(40.0)),
            offer(Some("Фрунзенский"), Some(200.0), None),
            offer(Some("Адмиралтейский район"), None, Some(50.0)),
            offer(None, Some(999.0), Some(99.0)),
        ];
        assert_eq!(
            district_means(&offers),
            vec![
                DistrictStat { district: "Адмиралтейский".into(), mean_price: None, mean_area: Some(50.0) },
                DistrictStat { district: "Фрунзенский".into(), mean_price: Some(150.0), mean_area: Some(40.0) },
            ]
        );
    }

    #[test]
    fn test_chart_has_bars_per_district() {
        let stats = district_means(&[
            offer(Some("A & B"), Some(100.0), Some(40.0)),
            offer(Some("C"), Some(300.0), Some(60.0)),
        ]);
        let svg = render_chart("Санкт Петербург", &[
            ChartRow { label: "Secondary", stats: &stats },
            ChartRow { label: "New", stats: &[] },
        ]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Санкт Петербург"));
        assert!(svg.contains("A &amp; B"));
        assert_eq!(svg.matches(&format!(r#"fill="{}""#, BAR_FILL)).count(), 4);
        assert_eq!(svg.matches("нет данных").count(), 2);
    }
}
