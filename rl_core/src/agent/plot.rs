// Reward graph from the monitor log.

use std::path::Path;
use std::sync::OnceLock;

use plotters::prelude::*;
use plotters::style::FontStyle;
use tracing::{debug, warn};

use crate::env::monitor::MonitorResults;
use crate::error::TrainError;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 500;
const SMOOTHING_WINDOW: usize = 50;

pub const X_AXIS_DESC: &str = "Timesteps";
pub const Y_AXIS_DESC: &str = "Reward";

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static LABEL_FONT: OnceLock<bool> = OnceLock::new();

/// Registers the first system sans font found as "sans-serif". Returns false when none exists.
pub fn label_font_available() -> bool {
    *LABEL_FONT.get_or_init(|| {
        for path in FONT_CANDIDATES {
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            // plotters keeps registered fonts for the life of the process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
                debug!("Plot labels use {}", path);
                return true;
            }
        }
        false
    })
}

fn plot_error(err: impl std::fmt::Display) -> TrainError {
    TrainError::Plot(err.to_string())
}

/// Episode rewards against cumulative steps, raw and smoothed, written as a PNG.
pub fn plot_results(results: &MonitorResults, path: &Path) -> Result<(), TrainError> {
    if results.rewards.is_empty() {
        return Err(TrainError::Plot("no finished episodes to plot".into()));
    }
    let steps = results.cumulative_steps();
    let smoothed = moving_average(&results.rewards, SMOOTHING_WINDOW);

    let x_max = steps.last().copied().unwrap_or(1).max(1) as f64;
    let (mut y_min, mut y_max) = results
        .rewards
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &r| (lo.min(r), hi.max(r)));
    if (y_max - y_min).abs() < f32::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let labelled = label_font_available();
    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if labelled {
        builder.x_label_area_size(40).y_label_area_size(60);
    }
    let mut chart = builder
        .build_cartesian_2d(0.0..x_max, y_min as f64..y_max as f64)
        .map_err(plot_error)?;

    let mut mesh = chart.configure_mesh();
    if labelled {
        mesh.x_desc(X_AXIS_DESC)
            .y_desc(Y_AXIS_DESC)
            .axis_desc_style(("sans-serif", 14))
            .label_style(("sans-serif", 12));
    } else {
        warn!("No font found for plot labels, drawing the reward graph without axis text");
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw().map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            steps.iter().zip(&results.rewards).map(|(&x, &y)| (x as f64, y as f64)),
            &RGBColor(180, 200, 230),
        ))
        .map_err(plot_error)?;
    chart
        .draw_series(LineSeries::new(
            steps.iter().zip(&smoothed).map(|(&x, &y)| (x as f64, y as f64)),
            BLUE.stroke_width(2),
        ))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

/// Trailing mean over at most `window` values.
pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average() {
        assert_eq!(moving_average(&[1.0, 3.0, 5.0, 7.0], 2), vec![1.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_plot_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let results = MonitorResults {
            t_start: 0.0,
            env_id: "None".into(),
            rewards: vec![0.0, 1.0, 0.5, 2.0],
            lengths: vec![10, 10, 10, 10],
            times: vec![1.0, 2.0, 3.0, 4.0],
        };
        let path = dir.path().join("reward_graph.png");
        plot_results(&results, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_draws_axis_descriptions() {
        if !label_font_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let results = MonitorResults {
            t_start: 0.0,
            env_id: "None".into(),
            rewards: vec![0.0, 1.0, 0.5, 2.0],
            lengths: vec![10, 10, 10, 10],
            times: vec![1.0, 2.0, 3.0, 4.0],
        };
        let path = dir.path().join("reward_graph.png");
        plot_results(&results, &path).unwrap();

        // Between the margin and the tick labels only the rotated y description is drawn
        let img = image::open(&path).unwrap().to_rgb8();
        let inked = (20..40)
            .flat_map(|x| (20..HEIGHT - 60).map(move |y| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y).0 != [255, 255, 255])
            .count();
        assert!(inked > 0);
    }
}
