use crate::{Control, State};

/// 実システムの履歴とコストの累積
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    trajectory: Vec<State>,
    controls: Vec<Control>,
    step_costs: Vec<f64>,
    total_cost: f64,
}

/// 1回の走行の集計結果
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub positions: na::Matrix2xX<f64>,
    pub velocities: na::Matrix2xX<f64>,
    pub controls: na::Matrix2xX<f64>,
    /// 各状態での速さ (速度成分のノルム)
    pub speeds: Vec<f64>,
    pub mean_speed: f64,
    pub total_cost: f64,
    /// 経過時間あたりのコスト
    pub average_cost: f64,
    pub steps: usize,
}

impl Recorder {
    pub fn new(x0: State) -> Self {
        Self {
            trajectory: vec![x0],
            ..Self::default()
        }
    }

    /// 1ステップ分を追記する
    pub fn record(&mut self, x: State, u: Control, cost: f64) {
        self.trajectory.push(x);
        self.controls.push(u);
        self.total_cost += cost;
        self.step_costs.push(self.total_cost);
    }

    pub fn trajectory(&self) -> &[State] {
        &self.trajectory
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// 各ステップ終了時点の累積コスト
    pub fn cumulative_costs(&self) -> &[f64] {
        &self.step_costs
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn steps(&self) -> usize {
        self.controls.len()
    }

    pub fn summarize(&self, dt: f64) -> RunSummary {
        let n = self.trajectory.len();
        let positions = na::Matrix2xX::from_fn(n, |r, c| self.trajectory[c][r]);
        let velocities = na::Matrix2xX::from_fn(n, |r, c| self.trajectory[c][r + 2]);
        let controls = na::Matrix2xX::from_fn(self.controls.len(), |r, c| self.controls[c][r]);
        let speeds: Vec<f64> = velocities.column_iter().map(|v| v.norm()).collect();
        let mean_speed = if speeds.is_empty() {
            0.0
        } else {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        };
        let elapsed = self.steps() as f64 * dt;
        let average_cost = if elapsed > 0.0 {
            self.total_cost / elapsed
        } else {
            0.0
        };
        RunSummary {
            positions,
            velocities,
            controls,
            speeds,
            mean_speed,
            total_cost: self.total_cost,
            average_cost,
            steps: self.steps(),
        }
    }
}
