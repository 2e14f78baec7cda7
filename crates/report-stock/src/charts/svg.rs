//! Minimal SVG writer for line, band and bar charts

use std::fmt::Write as _;

/// Chart colours
pub mod palette {
    pub const PRICE: &str = "#1f2937";
    pub const SHORT: &str = "#2563eb";
    pub const LONG: &str = "#ea580c";
    pub const VOLUME: &str = "#9ca3af";
    pub const SIGNAL: &str = "#dc2626";
    pub const UP: &str = "#16a34a";
    pub const DOWN: &str = "#dc2626";
    pub const RSI: &str = "#7c3aed";
    pub const GRID: &str = "#e5e7eb";
    pub const FAN: &str = "#2563eb";
}

/// Escape text for use inside SVG elements and attributes
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// A rectangular plotting area mapping data coordinates to pixels
#[derive(Debug, Clone, Copy)]
pub struct Panel {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Panel {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
        }
    }

    pub fn x_range(mut self, min: f64, max: f64) -> Self {
        (self.x_min, self.x_max) = widen(min, max);
        self
    }

    /// Set the y range with 5% padding on both sides
    pub fn y_range(mut self, min: f64, max: f64) -> Self {
        let (min, max) = widen(min, max);
        let pad = (max - min) * 0.05;
        self.y_min = min - pad;
        self.y_max = max + pad;
        self
    }

    /// Set the y range exactly
    pub fn y_fixed(mut self, min: f64, max: f64) -> Self {
        (self.y_min, self.y_max) = widen(min, max);
        self
    }

    pub fn px(&self, x: f64) -> f64 {
        self.left + (x - self.x_min) / (self.x_max - self.x_min) * self.width
    }

    pub fn py(&self, y: f64) -> f64 {
        self.top + (self.y_max - y) / (self.y_max - self.y_min) * self.height
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }
}

fn widen(min: f64, max: f64) -> (f64, f64) {
    if !(min.is_finite() && max.is_finite()) {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        let pad = if min.abs() > 1.0 { min.abs() * 0.01 } else { 1.0 };
        (min - pad, max + pad)
    } else {
        (min.min(max), min.max(max))
    }
}

/// Range of finite values
pub fn extent<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// An SVG document under construction
#[derive(Debug)]
pub struct SvgDocument {
    width: u32,
    height: u32,
    body: String,
}

impl SvgDocument {
    pub fn new(width: u32, height: u32) -> Self {
        let mut doc = Self {
            width,
            height,
            body: String::new(),
        };
        let _ = writeln!(
            doc.body,
            r#"<rect x="0" y="0" width="{width}" height="{height}" fill="white"/>"#
        );
        doc
    }

    pub fn title(&mut self, text: &str) {
        let _ = writeln!(
            self.body,
            r#"<text x="{}" y="24" font-size="16" font-weight="bold" text-anchor="middle">{}</text>"#,
            self.width / 2,
            escape(text)
        );
    }

    pub fn text(&mut self, x: f64, y: f64, size: u32, anchor: &str, text: &str) {
        let _ = writeln!(
            self.body,
            r#"<text x="{x:.1}" y="{y:.1}" font-size="{size}" text-anchor="{anchor}">{}</text>"#,
            escape(text)
        );
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str, dash: bool) {
        let dash = if dash { r#" stroke-dasharray="4 3""# } else { "" };
        let _ = writeln!(
            self.body,
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{stroke}" stroke-width="1"{dash}/>"#
        );
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, opacity: f64) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{:.1}" height="{:.1}" fill="{fill}" fill-opacity="{opacity:.2}"/>"#,
            w.max(0.5),
            h.max(0.5)
        );
    }

    /// Polyline through data points of `panel`; non-finite points are skipped
    pub fn polyline(&mut self, panel: &Panel, points: &[(f64, f64)], stroke: &str, width: f64) {
        let coords = coordinates(panel, points.iter());
        if coords.is_empty() {
            return;
        }
        let _ = writeln!(
            self.body,
            r#"<polyline points="{coords}" fill="none" stroke="{stroke}" stroke-width="{width}"/>"#
        );
    }

    /// Filled area between `lower` and `upper`, both ordered by x
    pub fn band(
        &mut self,
        panel: &Panel,
        lower: &[(f64, f64)],
        upper: &[(f64, f64)],
        fill: &str,
        opacity: f64,
    ) {
        let coords = coordinates(panel, lower.iter().chain(upper.iter().rev()));
        if coords.is_empty() {
            return;
        }
        let _ = writeln!(
            self.body,
            r#"<polygon points="{coords}" fill="{fill}" fill-opacity="{opacity:.2}" stroke="none"/>"#
        );
    }

    /// Frame, horizontal grid lines and y-axis labels for a panel
    pub fn axes(&mut self, panel: &Panel, ticks: usize, decimals: usize) {
        let ticks = ticks.max(2);
        for i in 0..ticks {
            let value = panel.y_min + (panel.y_max - panel.y_min) * i as f64 / (ticks - 1) as f64;
            let y = panel.py(value);
            self.line(panel.left, y, panel.right(), y, palette::GRID, false);
            self.text(
                panel.left - 6.0,
                y + 4.0,
                10,
                "end",
                &format!("{value:.decimals$}"),
            );
        }
        let _ = writeln!(
            self.body,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="{}"/>"#,
            panel.left,
            panel.top,
            panel.width,
            panel.height,
            palette::PRICE
        );
    }

    /// Legend entries stacked in the top-left corner of `panel`
    pub fn legend(&mut self, panel: &Panel, entries: &[(&str, &str)]) {
        for (i, (label, colour)) in entries.iter().enumerate() {
            let y = panel.top + 14.0 + 14.0 * i as f64;
            let x = panel.left + 8.0;
            self.line(x, y - 4.0, x + 16.0, y - 4.0, colour, false);
            self.text(x + 20.0, y, 10, "start", label);
        }
    }

    pub fn finish(self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\" font-family=\"sans-serif\">\n{body}</svg>\n",
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

fn coordinates<'a>(panel: &Panel, points: impl Iterator<Item = &'a (f64, f64)>) -> String {
    points
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|&(x, y)| format!("{:.1},{:.1}", panel.px(x), panel.py(y)))
        .collect::<Vec<_>>()
        .join(" ")
}
