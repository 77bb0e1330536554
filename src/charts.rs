// SVG charts for the vulnerability section

use crate::render::escape;

/// Bar colors, applied to bars in order and repeated.
pub const BAR_COLORS: [&str; 3] = ["green", "orange", "red"];
const BOX_FILL: &str = "#3498db";

/// Counts of each distinct non-empty value, most frequent first. Equal
/// counts keep the order in which the values first appear.
pub fn value_counts(values: &[&str]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values.iter().filter(|v| !v.is_empty()) {
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value.to_string(), 1)),
        }
    }
    // stable sort keeps first-appearance order among ties
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: Vec<f64>,
}

/// Quartiles by linear interpolation, whiskers at the furthest points within
/// 1.5 IQR of the box. `None` for an empty sample.
pub fn box_stats(values: &[f64]) -> Option<BoxStats> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q1 = percentile(&sorted, 0.25);
    let median = percentile(&sorted, 0.5);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    let low_fence = q1 - 1.5 * iqr;
    let high_fence = q3 + 1.5 * iqr;

    let inside = sorted.iter().copied().filter(|v| *v >= low_fence && *v <= high_fence);
    let whisker_low = inside.clone().fold(f64::INFINITY, f64::min).min(q1);
    let whisker_high = inside.fold(f64::NEG_INFINITY, f64::max).max(q3);
    let outliers = sorted
        .iter()
        .copied()
        .filter(|v| *v < low_fence || *v > high_fence)
        .collect();

    Some(BoxStats { q1, median, q3, whisker_low, whisker_high, outliers })
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn bar_chart_svg(title: &str, y_label: &str, counts: &[(String, usize)]) -> String {
    let width = 520;
    let height = 300;
    let margin = 50;
    let bottom = 70; // room for category labels
    let chart_width = width - 2 * margin;
    let chart_height = height - margin - bottom;

    if counts.is_empty() {
        return empty_svg(title, width, height);
    }

    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(1).max(1);
    let slot = chart_width as f64 / counts.len() as f64;
    let mut bars = String::new();

    for (i, (label, count)) in counts.iter().enumerate() {
        let bar_height = (*count as f64 / max_count as f64) * (chart_height as f64 * 0.9);
        let x = margin as f64 + i as f64 * slot + slot * 0.1;
        let y = (margin + chart_height) as f64 - bar_height;
        let cx = x + slot * 0.4;
        let color = BAR_COLORS[i % BAR_COLORS.len()];

        bars.push_str(&format!(
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"##,
            x, y, slot * 0.8, bar_height, color
        ));
        bars.push_str(&format!(
            r##"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="11" fill="#374151">{}</text>"##,
            cx, y - 4.0, count
        ));
        bars.push_str(&format!(
            r##"<text x="{:.1}" y="{}" text-anchor="end" font-size="10" fill="#374151" transform="rotate(-30, {:.1}, {})">{}</text>"##,
            cx, margin + chart_height + 16, cx, margin + chart_height + 16, escape(label)
        ));
    }

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" style="background:white; border-radius:8px">
  <text x="{tx}" y="24" text-anchor="middle" font-size="14" font-weight="600" fill="#2c3e50">{title}</text>
  <text x="15" y="{ly}" text-anchor="middle" font-size="12" fill="#6b7280" transform="rotate(-90, 15, {ly})">{y_label}</text>
  {grid}
  <line x1="{m}" y1="{base}" x2="{right}" y2="{base}" stroke="#9ca3af" stroke-width="1"/>
  <line x1="{m}" y1="{m}" x2="{m}" y2="{base}" stroke="#9ca3af" stroke-width="1"/>
  {bars}
</svg>"##,
        w = width,
        h = height,
        tx = width / 2,
        title = escape(title),
        ly = margin + chart_height / 2,
        y_label = escape(y_label),
        grid = y_grid(margin, chart_width, chart_height, max_count as f64 / 0.9, 0.0),
        m = margin,
        base = margin + chart_height,
        right = margin + chart_width,
        bars = bars,
    )
}

pub fn box_plot_svg(title: &str, stats: Option<&BoxStats>) -> String {
    let width = 320;
    let height = 240;
    let margin = 40;
    let chart_width = width - 2 * margin;
    let chart_height = height - 2 * margin;

    let Some(stats) = stats else {
        return empty_svg(title, width, height);
    };

    let lo = stats.outliers.iter().copied().fold(stats.whisker_low, f64::min);
    let hi = stats.outliers.iter().copied().fold(stats.whisker_high, f64::max);
    let pad = ((hi - lo) * 0.05).max(1e-9);
    let (lo, hi) = (lo - pad, hi + pad);
    let y = |v: f64| margin as f64 + (hi - v) / (hi - lo) * chart_height as f64;

    let cx = margin as f64 + chart_width as f64 / 2.0;
    let half = chart_width as f64 * 0.2;
    let cap = half / 2.0;

    let mut shapes = String::new();
    shapes.push_str(&format!(
        r##"<line x1="{cx:.1}" y1="{:.1}" x2="{cx:.1}" y2="{:.1}" stroke="black"/>"##,
        y(stats.whisker_high), y(stats.q3)
    ));
    shapes.push_str(&format!(
        r##"<line x1="{cx:.1}" y1="{:.1}" x2="{cx:.1}" y2="{:.1}" stroke="black"/>"##,
        y(stats.q1), y(stats.whisker_low)
    ));
    for w in [stats.whisker_low, stats.whisker_high] {
        shapes.push_str(&format!(
            r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="black"/>"##,
            cx - cap, y(w), cx + cap, y(w)
        ));
    }
    shapes.push_str(&format!(
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="black"/>"##,
        cx - half, y(stats.q3), half * 2.0, (y(stats.q1) - y(stats.q3)).max(0.5), BOX_FILL
    ));
    shapes.push_str(&format!(
        r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="black" stroke-width="2"/>"##,
        cx - half, y(stats.median), cx + half, y(stats.median)
    ));
    for o in &stats.outliers {
        shapes.push_str(&format!(
            r##"<circle cx="{cx:.1}" cy="{:.1}" r="3" fill="none" stroke="black"/>"##,
            y(*o)
        ));
    }

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" style="background:white; border-radius:8px">
  <text x="{tx}" y="22" text-anchor="middle" font-size="13" font-weight="600" fill="#2c3e50">{title}</text>
  {grid}
  {shapes}
</svg>"##,
        w = width,
        h = height,
        tx = width / 2,
        title = escape(title),
        grid = y_grid(margin, chart_width, chart_height, hi, lo),
        shapes = shapes,
    )
}

/// Horizontal grid lines with value labels between `lo` and `hi`.
fn y_grid(margin: u32, chart_width: u32, chart_height: u32, hi: f64, lo: f64) -> String {
    let ticks = 4;
    let mut out = String::new();
    for i in 0..=ticks {
        let frac = i as f64 / ticks as f64;
        let value = lo + (hi - lo) * frac;
        let y = margin as f64 + chart_height as f64 * (1.0 - frac);
        out.push_str(&format!(
            r##"<line x1="{m}" y1="{y:.1}" x2="{r}" y2="{y:.1}" stroke="#e5e7eb" stroke-width="1"/><text x="{lx}" y="{ty:.1}" text-anchor="end" font-size="10" fill="#6b7280">{v}</text>"##,
            m = margin,
            r = margin + chart_width,
            lx = margin - 4,
            ty = y + 3.0,
            v = tick_label(value),
        ));
    }
    out
}

fn tick_label(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn empty_svg(title: &str, width: u32, height: u32) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" style="background:white; border-radius:8px"><text x="{tx}" y="24" text-anchor="middle" font-size="14" fill="#2c3e50">{title}</text><text x="{tx}" y="{cy}" text-anchor="middle" font-size="12" fill="#9ca3af">Sin datos</text></svg>"##,
        w = width,
        h = height,
        tx = width / 2,
        cy = height / 2,
        title = escape(title),
    )
}

/// `Vul_Equip` → `Vulnerabilidad Equip`
pub fn level_chart_title(column: &str) -> String {
    column.replace("Vul_", "Vulnerabilidad ")
}

/// `Ind_Equip` → `Índice Equip`
pub fn index_chart_title(column: &str) -> String {
    column.replace("Ind_", "Índice ")
}
