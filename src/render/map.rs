//! Leaflet choropleth page: one toggleable layer per priced grid, colored in
//! nine equal-width price bins.

use super::fmt_amount;
use crate::models::PricedCell;
use crate::spatial::geojson::polygon_coordinates;
use anyhow::Result;
use serde::Serialize;
use serde_json::json;

/// ColorBrewer YlOrRd, 9 classes.
pub const YL_OR_RD: [&str; 9] = [
    "#ffffcc", "#ffeda0", "#fed976", "#feb24c", "#fd8d3c", "#fc4e2a", "#e31a1c", "#bd0026", "#800026",
];

pub const FILL_OPACITY: f64 = 0.5;
const MISSING_FILL: &str = "#cccccc";

/// Equal-width bins over the observed price range.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBins {
    min: f64,
    max: f64,
}

impl PriceBins {
    /// `None` when no cell has a price.
    pub fn from_cells(cells: &[PricedCell]) -> Option<Self> {
        let mut prices = cells.iter().filter_map(|c| c.price).filter(|p| p.is_finite());
        let first = prices.next()?;
        let (min, max) = prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Self { min, max })
    }

    /// Ten edges from min to max.
    pub fn edges(&self) -> Vec<f64> {
        let width = (self.max - self.min) / YL_OR_RD.len() as f64;
        (0..=YL_OR_RD.len()).map(|i| self.min + width * i as f64).collect()
    }

    /// Bin index; the maximum falls in the last bin.
    pub fn bin(&self, price: f64) -> usize {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0;
        }
        let i = ((price - self.min) / span * YL_OR_RD.len() as f64).floor();
        (i.max(0.0) as usize).min(YL_OR_RD.len() - 1)
    }

    pub fn color(&self, price: f64) -> &'static str {
        YL_OR_RD[self.bin(price)]
    }
}

pub struct MapLayer<'a> {
    pub name: String,
    pub legend: String,
    pub cells: &'a [PricedCell],
    pub show: bool,
}

#[derive(Serialize)]
struct LegendEntry {
    color: &'static str,
    label: String,
}

fn layer_json(layer: &MapLayer<'_>) -> serde_json::Value {
    let bins = PriceBins::from_cells(layer.cells);
    let features: Vec<serde_json::Value> = layer
        .cells
        .iter()
        .map(|cell| {
            let fill = match (cell.price, &bins) {
                (Some(p), Some(b)) => b.color(p),
                _ => MISSING_FILL,
            };
            json!({
                "type": "Feature",
                "id": cell.id.to_string(),
                "properties": {
                    "id": cell.id.to_string(),
                    "price_per_area": cell.price,
                    "fill": fill,
                },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": polygon_coordinates(&cell.polygon),
                },
            })
        })
        .collect();

    let legend: Vec<LegendEntry> = match &bins {
        Some(b) => b
            .edges()
            .windows(2)
            .zip(YL_OR_RD)
            .map(|(w, color)| LegendEntry {
                color,
                label: format!("{} – {}", fmt_amount(w[0]), fmt_amount(w[1])),
            })
            .collect(),
        None => Vec::new(),
    };

    json!({
        "name": layer.name,
        "show": layer.show,
        "legend": { "title": layer.legend, "entries": legend },
        "data": { "type": "FeatureCollection", "features": features },
    })
}

/// Standalone HTML page centered on `center` ([lat, lon]).
pub fn render_map(title: &str, center: [f64; 2], layers: &[MapLayer<'_>]) -> Result<String> {
    let layers: Vec<serde_json::Value> = layers.iter().map(layer_json).collect();
    // Keep the payload from closing the script element early.
    let payload = serde_json::to_string(&layers)?.replace("</", "<\\/");

    Ok(PAGE
        .replace("__TITLE__", &super::escape_xml(title))
        .replace("__CENTER__", &serde_json::to_string(&center)?)
        .replace("__OPACITY__", &FILL_OPACITY.to_string())
        .replace("__LAYERS__", &payload))
}

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>__TITLE__</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
  html, body { width: 100%; height: 100%; margin: 0; padding: 0; }
  #map { position: absolute; width: 70%; height: 70%; left: 15%; top: 15%; }
  .legend { background: white; padding: 6px 8px; font: 12px sans-serif; line-height: 18px; }
  .legend i { width: 18px; height: 18px; float: left; margin-right: 6px; opacity: __OPACITY__; }
</style>
</head>
<body>
<div id="map"></div>
<script>
const map = L.map('map').setView(__CENTER__, 10);
L.tileLayer('https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png', {
  attribution: '&copy; OpenStreetMap contributors &copy; CARTO',
  subdomains: 'abcd',
  maxZoom: 20
}).addTo(map);

const layers = __LAYERS__;
const overlays = {};
const legends = {};

for (const layer of layers) {
  const geo = L.geoJSON(layer.data, {
    style: f => ({ fillColor: f.properties.fill, fillOpacity: __OPACITY__, weight: 0 }),
    onEachFeature: (f, l) => {
      const p = f.properties.price_per_area;
      l.bindTooltip(p === null ? f.properties.id : f.properties.id + ': ' + Math.round(p));
    }
  });
  const legend = L.control({ position: 'bottomright' });
  legend.onAdd = () => {
    const div = L.DomUtil.create('div', 'legend');
    div.innerHTML = '<b>' + layer.legend.title + '</b><br>' +
      layer.legend.entries.map(e => '<i style="background:' + e.color + '"></i>' + e.label).join('<br>');
    return div;
  };
  overlays[layer.name] = geo;
  legends[layer.name] = legend;
  if (layer.show) {
    geo.addTo(map);
    legend.addTo(map);
  }
}

map.on('overlayadd', e => legends[e.name] && legends[e.name].addTo(map));
map.on('overlayremove', e => legends[e.name] && legends[e.name].remove());
L.control.layers(null, overlays, { collapsed: false }).addTo(map);
</script>
</body>
</html>
"#;
