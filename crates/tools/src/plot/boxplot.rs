//! Boxplots of a vector attribute column
//!
//! Values come from the engine's attribute query, optionally grouped by a
//! category column; the five-number summaries, whiskers and fliers are
//! computed here and handed to the plotting library's bitmap backend for
//! rendering. Whiskers follow the 1.5 IQR convention, clamped to observed
//! values.

use std::path::PathBuf;

use grasskit_core::{Context, Error, ModuleCall, Result};
use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::ranged1d::Ranged;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct BoxplotParams {
    /// Vector map holding the attribute table.
    pub map: String,
    /// Numeric attribute column to plot.
    pub column: String,
    /// Category column to group the data by.
    pub group_by: Option<String>,
    /// Extra row filter; `column IS NOT NULL` is always applied.
    pub where_clause: Option<String>,
    /// Output image path.
    pub output: PathBuf,
    /// Figure dimensions in inches; defaults depend on orientation.
    pub dimensions: Option<(f64, f64)>,
    pub dpi: f64,
    pub fontsize: u32,
    /// Sort grouped boxplots by their median.
    pub order: Option<SortOrder>,
    /// Explicit value-axis limits.
    pub axis_limits: Option<(f64, f64)>,
    pub horizontal: bool,
    pub show_outliers: bool,
    pub notch: bool,
    pub rotate_labels: bool,
    pub grid: bool,
    pub box_color: String,
    pub border_color: String,
    pub median_color: String,
    pub flier_color: String,
    /// Box width within the unit-wide slot, (0, 1].
    pub box_width: f64,
    pub line_width: u32,
    pub median_line_width: u32,
    pub flier_size: f64,
}

/// Five-number summary plus whiskers and fliers for one box.
#[derive(Debug, Clone)]
pub struct BoxStats {
    pub label: String,
    pub n: usize,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub fliers: Vec<f64>,
}

impl BoxStats {
    /// Notch half-height around the median.
    fn notch_height(&self) -> f64 {
        1.57 * (self.q3 - self.q1) / (self.n as f64).sqrt()
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    if below == above {
        sorted[below]
    } else {
        let fraction = position - below as f64;
        sorted[below] * (1.0 - fraction) + sorted[above] * fraction
    }
}

/// Summary statistics for one group of values.
pub fn summarize(label: &str, mut values: Vec<f64>) -> Option<BoxStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = quantile(&values, 0.25);
    let median = quantile(&values, 0.5);
    let q3 = quantile(&values, 0.75);
    let iqr = q3 - q1;
    let low_fence = q1 - 1.5 * iqr;
    let high_fence = q3 + 1.5 * iqr;
    let whisker_low = values
        .iter()
        .copied()
        .find(|v| *v >= low_fence)
        .unwrap_or(q1);
    let whisker_high = values
        .iter()
        .rev()
        .copied()
        .find(|v| *v <= high_fence)
        .unwrap_or(q3);
    let fliers = values
        .iter()
        .copied()
        .filter(|v| *v < whisker_low || *v > whisker_high)
        .collect();
    Some(BoxStats {
        label: label.to_string(),
        n: values.len(),
        q1,
        median,
        q3,
        whisker_low,
        whisker_high,
        fliers,
    })
}

/// Sort boxes by their median value.
pub fn order_groups(groups: &mut [BoxStats], order: SortOrder) {
    groups.sort_by(|a, b| {
        let ordering = a
            .median
            .partial_cmp(&b.median)
            .unwrap_or(std::cmp::Ordering::Equal);
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

fn parse_color(input: &str) -> Result<RGBColor> {
    if let Some((r, rest)) = input.split_once(':') {
        if let Some((g, b)) = rest.split_once(':') {
            let channel = |text: &str| -> Result<u8> {
                text.trim().parse().map_err(|_| {
                    Error::Config(format!("{input} is not a valid color"))
                })
            };
            return Ok(RGBColor(channel(r)?, channel(g)?, channel(b)?));
        }
    }
    match input.to_lowercase().as_str() {
        "white" => Ok(RGBColor(255, 255, 255)),
        "black" => Ok(RGBColor(0, 0, 0)),
        "red" => Ok(RGBColor(220, 20, 60)),
        "green" => Ok(RGBColor(0, 128, 0)),
        "blue" => Ok(RGBColor(0, 0, 255)),
        "orange" => Ok(RGBColor(255, 165, 0)),
        "yellow" => Ok(RGBColor(255, 215, 0)),
        "cyan" => Ok(RGBColor(0, 255, 255)),
        "magenta" => Ok(RGBColor(255, 0, 255)),
        "gray" | "grey" => Ok(RGBColor(128, 128, 128)),
        "brown" => Ok(RGBColor(139, 69, 19)),
        "purple" => Ok(RGBColor(128, 0, 128)),
        _ => Err(Error::Config(format!("{input} is not a valid color"))),
    }
}

fn parse_rows(output: &str, grouped: bool) -> Result<Vec<(String, f64)>> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (group, value) = if grouped {
            line.split_once('|').ok_or(Error::Parse {
                what: "attribute rows",
                detail: format!("expected 'group|value', got '{line}'"),
            })?
        } else {
            ("", line)
        };
        let value: f64 = value.trim().parse().map_err(|e| Error::Parse {
            what: "attribute rows",
            detail: format!("value '{value}': {e}"),
        })?;
        rows.push((group.to_string(), value));
    }
    if rows.is_empty() {
        return Err(Error::Precondition(
            "the attribute query returned no rows".to_string(),
        ));
    }
    Ok(rows)
}

/// Group values preserving first-appearance order.
fn group_values(rows: Vec<(String, f64)>) -> Vec<(String, Vec<f64>)> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for (group, value) in rows {
        match groups.iter_mut().find(|(name, _)| *name == group) {
            Some((_, values)) => values.push(value),
            None => groups.push((group, vec![value])),
        }
    }
    groups
}

pub fn run(ctx: &Context, params: &BoxplotParams) -> Result<()> {
    if !(0.0..=1.0).contains(&params.box_width) || params.box_width == 0.0 {
        return Err(Error::InvalidParameter {
            name: "box_width",
            value: params.box_width.to_string(),
            reason: "must be in (0, 1]".to_string(),
        });
    }
    let box_color = parse_color(&params.box_color)?;
    let border_color = parse_color(&params.border_color)?;
    let median_color = parse_color(&params.median_color)?;
    let flier_color = parse_color(&params.flier_color)?;

    let where_clause = match &params.where_clause {
        Some(clause) => format!("{clause} AND {} IS NOT NULL", params.column),
        None => format!("{} IS NOT NULL", params.column),
    };
    let columns = match &params.group_by {
        Some(group_by) => format!("{group_by},{}", params.column),
        None => params.column.clone(),
    };
    let output = ctx.read(
        &ModuleCall::new("v.db.select")
            .flag('c')
            .option("map", &params.map)
            .option("columns", &columns)
            .option("where", &where_clause),
    )?;
    let rows = parse_rows(&output, params.group_by.is_some())?;

    let mut boxes: Vec<BoxStats> = group_values(rows)
        .into_iter()
        .filter_map(|(label, values)| summarize(&label, values))
        .collect();
    if let Some(order) = params.order {
        order_groups(&mut boxes, order);
    }

    let (width_in, height_in) = params
        .dimensions
        .unwrap_or(if params.horizontal { (6.0, 4.0) } else { (4.0, 6.0) });
    let pixels = (
        (width_in * params.dpi).round() as u32,
        (height_in * params.dpi).round() as u32,
    );

    info!("rendering {} boxplot(s) to {}", boxes.len(), params.output.display());
    render(
        &boxes,
        params,
        pixels,
        box_color,
        border_color,
        median_color,
        flier_color,
    )
}

fn plot_error<E: std::fmt::Display>(error: E) -> Error {
    Error::External {
        program: "plotting backend".to_string(),
        detail: error.to_string(),
    }
}

/// Swap coordinates for horizontal plots: positions run along one axis,
/// values along the other.
fn oriented(position: f64, value: f64, horizontal: bool) -> (f64, f64) {
    if horizontal {
        (value, position)
    } else {
        (position, value)
    }
}

fn render(
    boxes: &[BoxStats],
    params: &BoxplotParams,
    pixels: (u32, u32),
    box_color: RGBColor,
    border_color: RGBColor,
    median_color: RGBColor,
    flier_color: RGBColor,
) -> Result<()> {
    let count = boxes.len() as f64;
    let (value_min, value_max) = match params.axis_limits {
        Some(limits) => limits,
        None => {
            let mut low = f64::INFINITY;
            let mut high = f64::NEG_INFINITY;
            for b in boxes {
                low = low.min(b.whisker_low);
                high = high.max(b.whisker_high);
                if params.show_outliers {
                    for flier in &b.fliers {
                        low = low.min(*flier);
                        high = high.max(*flier);
                    }
                }
            }
            let pad = (high - low).abs().max(1e-9) * 0.05;
            (low - pad, high + pad)
        }
    };

    let root = BitMapBackend::new(&params.output, pixels).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut builder = ChartBuilder::on(&root);
    builder
        .margin(10)
        .x_label_area_size(if params.rotate_labels { 70 } else { 40 })
        .y_label_area_size(55);
    let labels: Vec<String> = boxes.iter().map(|b| b.label.clone()).collect();
    let label_of = |position: &f64| -> String {
        let index = position.round();
        if (position - index).abs() > 0.01 || index < 0.0 {
            return String::new();
        }
        labels.get(index as usize).cloned().unwrap_or_default()
    };
    let font = ("sans-serif", params.fontsize).into_font();
    let label_style = TextStyle::from(font.clone());
    let rotated_style = label_style
        .clone()
        .transform(FontTransform::Rotate90)
        .pos(Pos::new(HPos::Center, VPos::Top));

    if params.horizontal {
        let mut chart = builder
            .build_cartesian_2d(value_min..value_max, -0.5..(count - 0.5))
            .map_err(plot_error)?;
        let mut mesh = chart.configure_mesh();
        mesh.disable_y_mesh()
            .y_labels(boxes.len())
            .y_label_formatter(&label_of)
            .label_style(label_style.clone());
        if !params.grid {
            mesh.disable_x_mesh();
        }
        mesh.draw().map_err(plot_error)?;
        draw_boxes(&mut chart, boxes, params, box_color, border_color, median_color, flier_color)?;
    } else {
        let mut chart = builder
            .build_cartesian_2d(-0.5..(count - 0.5), value_min..value_max)
            .map_err(plot_error)?;
        let mut mesh = chart.configure_mesh();
        mesh.disable_x_mesh()
            .x_labels(boxes.len())
            .x_label_formatter(&label_of)
            .label_style(label_style.clone());
        if params.rotate_labels {
            mesh.x_label_style(rotated_style);
        }
        if !params.grid {
            mesh.disable_y_mesh();
        }
        mesh.draw().map_err(plot_error)?;
        draw_boxes(&mut chart, boxes, params, box_color, border_color, median_color, flier_color)?;
    }

    root.present().map_err(plot_error)?;
    Ok(())
}

fn draw_boxes<X, Y>(
    chart: &mut ChartContext<'_, BitMapBackend<'_>, Cartesian2d<X, Y>>,
    boxes: &[BoxStats],
    params: &BoxplotParams,
    box_color: RGBColor,
    border_color: RGBColor,
    median_color: RGBColor,
    flier_color: RGBColor,
) -> Result<()>
where
    X: Ranged<ValueType = f64>,
    Y: Ranged<ValueType = f64>,
{
    let horizontal = params.horizontal;
    let half = params.box_width / 2.0;
    let border = border_color.stroke_width(params.line_width);
    let median_style = median_color.stroke_width(params.median_line_width);

    for (index, b) in boxes.iter().enumerate() {
        let center = index as f64;
        let notch = params.notch.then(|| b.notch_height());
        let outline = box_outline(center, half, b, notch, horizontal);

        chart
            .draw_series(std::iter::once(Polygon::new(
                outline.clone(),
                box_color.filled(),
            )))
            .map_err(plot_error)?;
        let mut closed = outline;
        if let Some(first) = closed.first().copied() {
            closed.push(first);
        }
        chart
            .draw_series(std::iter::once(PathElement::new(closed, border)))
            .map_err(plot_error)?;

        // Median line spans the notch waist when notched.
        let median_half = if params.notch { half / 2.0 } else { half };
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![
                    oriented(center - median_half, b.median, horizontal),
                    oriented(center + median_half, b.median, horizontal),
                ],
                median_style,
            )))
            .map_err(plot_error)?;

        // Whiskers with caps half the box wide.
        for (from, to) in [(b.q3, b.whisker_high), (b.q1, b.whisker_low)] {
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![
                        oriented(center, from, horizontal),
                        oriented(center, to, horizontal),
                    ],
                    border,
                )))
                .map_err(plot_error)?;
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![
                        oriented(center - half / 2.0, to, horizontal),
                        oriented(center + half / 2.0, to, horizontal),
                    ],
                    border,
                )))
                .map_err(plot_error)?;
        }

        if params.show_outliers {
            chart
                .draw_series(b.fliers.iter().map(|flier| {
                    Circle::new(
                        oriented(center, *flier, horizontal),
                        params.flier_size.round().max(1.0) as i32,
                        flier_color.filled(),
                    )
                }))
                .map_err(plot_error)?;
        }
    }
    Ok(())
}

/// Box outline points; a notch indents the sides at the median.
fn box_outline(
    center: f64,
    half: f64,
    b: &BoxStats,
    notch: Option<f64>,
    horizontal: bool,
) -> Vec<(f64, f64)> {
    let points = match notch {
        Some(height) => {
            let lower = (b.median - height).max(b.q1);
            let upper = (b.median + height).min(b.q3);
            vec![
                (center - half, b.q1),
                (center + half, b.q1),
                (center + half, lower),
                (center + half / 2.0, b.median),
                (center + half, upper),
                (center + half, b.q3),
                (center - half, b.q3),
                (center - half, upper),
                (center - half / 2.0, b.median),
                (center - half, lower),
            ]
        }
        None => vec![
            (center - half, b.q1),
            (center + half, b.q1),
            (center + half, b.q3),
            (center - half, b.q3),
        ],
    };
    points
        .into_iter()
        .map(|(position, value)| oriented(position, value, horizontal))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(label: &str, median: f64) -> BoxStats {
        BoxStats {
            label: label.to_string(),
            n: 5,
            q1: median - 1.0,
            median,
            q3: median + 1.0,
            whisker_low: median - 2.0,
            whisker_high: median + 2.0,
            fliers: Vec::new(),
        }
    }

    #[test]
    fn descending_order_sorts_by_median() {
        let mut groups = vec![stats("group_A", 10.0), stats("group_B", 30.0), stats("group_C", 20.0)];
        order_groups(&mut groups, SortOrder::Descending);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["group_B", "group_C", "group_A"]);
    }

    #[test]
    fn ascending_order_reverses() {
        let mut groups = vec![stats("b", 30.0), stats("c", 20.0), stats("a", 10.0)];
        order_groups(&mut groups, SortOrder::Ascending);
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "c", "b"]);
    }

    #[test]
    fn summary_matches_known_quartiles() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let b = summarize("all", values).unwrap();
        assert_eq!(b.median, 5.0);
        assert_eq!(b.q1, 3.0);
        assert_eq!(b.q3, 7.0);
        assert_eq!(b.whisker_low, 1.0);
        assert_eq!(b.whisker_high, 9.0);
        assert!(b.fliers.is_empty());
    }

    #[test]
    fn outliers_fall_outside_the_whiskers() {
        let mut values = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        values.push(100.0);
        let b = summarize("all", values).unwrap();
        assert_eq!(b.fliers, vec![100.0]);
        assert!(b.whisker_high <= 14.0);
    }

    #[test]
    fn rows_parse_grouped_and_plain() {
        let grouped = parse_rows("a|1.5\nb|2\n", true).unwrap();
        assert_eq!(grouped[0], ("a".to_string(), 1.5));
        let plain = parse_rows("3.25\n4\n", false).unwrap();
        assert_eq!(plain[1].1, 4.0);
        assert!(parse_rows("a|oops\n", true).is_err());
    }

    #[test]
    fn colors_parse_names_and_triplets() {
        assert_eq!(parse_color("white").unwrap(), RGBColor(255, 255, 255));
        assert_eq!(parse_color("30:144:255").unwrap(), RGBColor(30, 144, 255));
        assert!(parse_color("not-a-color").is_err());
        assert!(parse_color("300:0:0").is_err());
    }

    #[test]
    fn grouping_preserves_first_appearance_order() {
        let rows = vec![
            ("b".to_string(), 1.0),
            ("a".to_string(), 2.0),
            ("b".to_string(), 3.0),
        ];
        let groups = group_values(rows);
        assert_eq!(groups[0].0, "b");
        assert_eq!(groups[0].1, vec![1.0, 3.0]);
        assert_eq!(groups[1].0, "a");
    }
}
