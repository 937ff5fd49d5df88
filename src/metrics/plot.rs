//! PNG line charts for a single series.

use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};

use super::models::TimedSeries;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 600;
const MARGIN: u32 = 50;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);

/// Number of horizontal grid lines.
const GRID_LINES: u32 = 4;

/// Render `values` (already scaled) against the series timestamps.
///
/// The x axis spans the earliest to the latest timestamp regardless of the
/// order the points come in.
pub fn render_line_chart(series: &TimedSeries, values: &[f64]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    let left = MARGIN as i64;
    let right = (WIDTH - MARGIN) as i64;
    let top = MARGIN as i64;
    let bottom = (HEIGHT - MARGIN) as i64;

    for i in 1..=GRID_LINES {
        let y = top + (bottom - top) * i as i64 / (GRID_LINES + 1) as i64;
        draw_line(&mut img, (left, y), (right, y), GRID);
    }
    draw_line(&mut img, (left, top), (left, bottom), AXIS);
    draw_line(&mut img, (left, bottom), (right, bottom), AXIS);

    let times: Vec<i64> = series.timestamps().iter().map(|t| t.timestamp_millis()).collect();
    let (Some(&t_min), Some(&t_max)) = (times.iter().min(), times.iter().max()) else {
        return img;
    };
    let (v_min, v_max) = value_range(values);

    let to_px = |t: i64, v: f64| -> (i64, i64) {
        let x = if t_max == t_min {
            (left + right) / 2
        } else {
            left + ((t - t_min) as f64 / (t_max - t_min) as f64 * (right - left) as f64) as i64
        };
        let y = bottom - ((v - v_min) / (v_max - v_min) * (bottom - top) as f64) as i64;
        (x, y)
    };

    let mut points: Vec<(i64, i64)> = times
        .iter()
        .zip(values)
        .map(|(&t, &v)| to_px(t, v))
        .collect();
    points.sort_by_key(|p| p.0);

    match points.as_slice() {
        [single] => draw_dot(&mut img, *single, LINE),
        _ => {
            for pair in points.windows(2) {
                draw_line(&mut img, pair[0], pair[1], LINE);
            }
        }
    }

    img
}

/// Render and write the chart as PNG.
pub fn save_line_chart(series: &TimedSeries, values: &[f64], path: &Path) -> Result<(), image::ImageError> {
    render_line_chart(series, values).save_with_format(path, ImageFormat::Png)
}

/// Min/max of `values`, padded when flat so the line sits mid-chart.
fn value_range(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.1 };
        return (min - pad, max + pad);
    }
    (min, max)
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

// Bresenham.
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(img, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_dot(img: &mut RgbImage, center: (i64, i64), color: Rgb<u8>) {
    for dx in -2..=2 {
        for dy in -2..=2 {
            put(img, center.0 + dx, center.1 + dy, color);
        }
    }
}
