use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use csv::ReaderBuilder;
use plotters::prelude::*;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Render leg altitude profiles from a station profile CSV"
)]
struct Cli {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "artifacts/profiles.png")]
    output: PathBuf,
    /// Column plotted against range
    #[arg(long, default_value = "h_km")]
    metric: String,
    #[arg(long, default_value_t = 1200)]
    width: u32,
    #[arg(long, default_value_t = 700)]
    height: u32,
}

const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let series = read_series(&cli.input, &cli.metric)?;
    if series.is_empty() {
        return Err(anyhow::anyhow!("No stations in the provided CSV"));
    }

    let points = series.values().flatten();
    let (mut x_max, mut y_min, mut y_max) = (0.0f64, f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-3);

    if let Some(parent) = cli.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let root = BitMapBackend::new(&cli.output, (cli.width, cli.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let font_family = select_font_family();
    let caption_font = FontDesc::new(font_family, 24.0, FontStyle::Bold);
    let label_font = FontDesc::new(font_family, 16.0, FontStyle::Normal);

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(format!("Leg profiles: {}", cli.metric), caption_font)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0.0..x_max.max(1.0), (y_min - pad)..(y_max + pad))?;

    chart
        .configure_mesh()
        .x_desc("Range (nmi)")
        .y_desc(cli.metric.as_str())
        .label_style(label_font.clone())
        .draw()?;

    for (i, (leg, stations)) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        chart
            .draw_series(LineSeries::new(
                stations.iter().copied(),
                ShapeStyle::from(&color).stroke_width(2),
            ))?
            .label(leg.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(label_font)
        .draw()?;

    root.present()?;
    println!("Wrote {}", cli.output.display());
    Ok(())
}

fn select_font_family() -> FontFamily<'static> {
    if cfg!(target_os = "macos") {
        FontFamily::Name("Helvetica")
    } else if cfg!(target_os = "windows") {
        FontFamily::Name("Arial")
    } else {
        FontFamily::Name("DejaVu Sans")
    }
}

/// `(range_nmi, metric)` pairs per leg, in station order.
fn read_series(
    path: &PathBuf,
    metric_name: &str,
) -> anyhow::Result<BTreeMap<String, Vec<(f64, f64)>>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow::anyhow!("CSV missing '{}' column", name))
    };
    let leg_idx = column("leg")?;
    let range_idx = column("range_nmi")?;
    let metric_idx = column(metric_name)?;

    let mut series: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
    for rec in rdr.records() {
        let r = rec?;
        let leg = r.get(leg_idx).unwrap_or("").to_string();
        let x: f64 = r.get(range_idx).unwrap_or("").parse().unwrap_or(f64::NAN);
        let y: f64 = r.get(metric_idx).unwrap_or("").parse().unwrap_or(f64::NAN);
        if x.is_finite() && y.is_finite() {
            series.entry(leg).or_default().push((x, y));
        }
    }
    Ok(series)
}
