use crate::config::{ParamKey, SimConfig};
use crate::cost::CostParams;
use crate::recorder::{Recorder, RunSummary};
use crate::simulation::Termination;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write csv")]
    Csv(#[from] csv::Error),
    #[error("failed to draw {path}: {message}")]
    Plot { path: String, message: String },
}

fn plot_err(path: &Path, e: impl std::fmt::Display) -> ExportError {
    ExportError::Plot {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn describe(termination: Termination) -> &'static str {
    match termination {
        Termination::Safety => "safety violation",
        Termination::Complete => "completed",
    }
}

/// 設定と結果のレポート
///
/// 設定の行はパラメータファイルと同じ表記なので、そのまま読み戻せる。
pub fn report_lines(
    cfg: &SimConfig,
    summary: &RunSummary,
    termination: Termination,
) -> Vec<String> {
    let mut lines = vec![
        "Standard MPPI".to_string(),
        "------------------------".to_string(),
    ];
    lines.extend(
        ParamKey::ALL
            .iter()
            .map(|k| format!("{} : {}", k.report_label(), cfg.get(*k))),
    );
    lines.push("-------RESULTS-------".to_string());
    lines.push(format!("Total Cost : {:.2}", summary.total_cost));
    lines.push(format!("Average Cost : {:.2}", summary.average_cost));
    lines.push(format!("Average Speed : {:.2}", summary.mean_speed));
    lines.push(format!("Steps Executed : {}", summary.steps));
    lines.push(format!("Termination : {}", describe(termination)));
    lines
}

/// 結果一式を dir に書き出す
pub fn export(
    dir: &Path,
    cfg: &SimConfig,
    recorder: &Recorder,
    summary: &RunSummary,
    termination: Termination,
) -> Result<(), ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    write_trajectory_csv(&dir.join("X.csv"), recorder)?;
    write_controls_csv(&dir.join("U.csv"), recorder)?;
    plot_trajectory(&dir.join("fig_traj.svg"), summary, &cfg.cost_function().params)?;
    plot_speed(&dir.join("fig_v.svg"), summary)?;
    plot_controls(&dir.join("fig_u.svg"), summary)?;

    let mut text = report_lines(cfg, summary, termination).join("\n");
    text.push('\n');
    text.push_str(&format!(
        "Generated : {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    let path = dir.join("params.txt");
    std::fs::write(&path, text).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("results written to {}", dir.display());
    Ok(())
}

pub fn write_trajectory_csv(path: &Path, recorder: &Recorder) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["px", "py", "psi", "v"])?;
    for x in recorder.trajectory() {
        wtr.write_record(x.iter().map(|v| v.to_string()))?;
    }
    wtr.flush().map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

pub fn write_controls_csv(path: &Path, recorder: &Recorder) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["omega", "accel"])?;
    for u in recorder.controls() {
        wtr.write_record(u.iter().map(|v| v.to_string()))?;
    }
    wtr.flush().map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

// 値の範囲 (一定値でも幅を持たせる)
fn bounds<I: IntoIterator<Item = f64>>(values: I) -> Range<f64> {
    let (lo, hi) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return -1.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad)..(hi + pad)
}

fn circle(radius: f64) -> impl Iterator<Item = (f64, f64)> {
    (0..=180).map(move |i| {
        let a = i as f64 / 180.0 * std::f64::consts::TAU;
        (radius * a.cos(), radius * a.sin())
    })
}

pub fn plot_trajectory(
    path: &Path,
    summary: &RunSummary,
    track: &CostParams,
) -> Result<(), ExportError> {
    let outer = track.track_radius + track.track_half_width;
    let reach = summary
        .positions
        .column_iter()
        .map(|p| p.amax())
        .fold(outer, f64::max)
        * 1.1;

    let root = SVGBackend::new(path, (640, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Trajectory", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(-reach..reach, -reach..reach)
        .map_err(|e| plot_err(path, e))?;
    chart.configure_mesh().draw().map_err(|e| plot_err(path, e))?;

    // コースの内側と外側
    for r in [track.track_radius - track.track_half_width, outer] {
        chart
            .draw_series(LineSeries::new(circle(r), &BLACK))
            .map_err(|e| plot_err(path, e))?;
    }
    chart
        .draw_series(LineSeries::new(
            summary.positions.column_iter().map(|p| (p[0], p[1])),
            &BLUE,
        ))
        .map_err(|e| plot_err(path, e))?;
    root.present().map_err(|e| plot_err(path, e))?;
    Ok(())
}

pub fn plot_speed(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let n = summary.speeds.len().max(2);
    let root = SVGBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("V vs t", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0..n - 1, bounds(summary.speeds.iter().copied()))
        .map_err(|e| plot_err(path, e))?;
    chart.configure_mesh().draw().map_err(|e| plot_err(path, e))?;
    chart
        .draw_series(LineSeries::new(
            summary.speeds.iter().copied().enumerate(),
            &BLUE,
        ))
        .map_err(|e| plot_err(path, e))?;
    root.present().map_err(|e| plot_err(path, e))?;
    Ok(())
}

pub fn plot_controls(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let n = summary.controls.ncols().max(2);
    let root = SVGBackend::new(path, (640, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(path, e))?;
    let panels = root.split_evenly((2, 1));
    for (i, (area, title)) in panels.iter().zip(["u_x vs t", "u_y vs t"]).enumerate() {
        let row = summary.controls.row(i);
        let mut chart = ChartBuilder::on(area)
            .caption(title, ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(0..n - 1, bounds(row.iter().copied()))
            .map_err(|e| plot_err(path, e))?;
        chart.configure_mesh().draw().map_err(|e| plot_err(path, e))?;
        chart
            .draw_series(LineSeries::new(row.iter().copied().enumerate(), &RED))
            .map_err(|e| plot_err(path, e))?;
    }
    root.present().map_err(|e| plot_err(path, e))?;
    Ok(())
}
