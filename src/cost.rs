use crate::config::ConfigError;
use crate::State;
use std::fmt;
use std::str::FromStr;

/// 状態コスト
///
/// `running` は各ステップ、`terminal` はホライゾン終端で評価される。
/// どちらも非負であることを前提にしている。
pub trait CostFunction: Sync {
    fn running(&self, x: &State) -> f64;

    fn terminal(&self, _x: &State) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CostKind {
    /// コース外で一定のペナルティ
    Hard,
    /// コース中心線からのずれに二乗ペナルティ
    Soft,
}

impl CostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostKind::Hard => "hard",
            CostKind::Soft => "soft",
        }
    }
}

impl fmt::Display for CostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hard" => Ok(CostKind::Hard),
            "soft" => Ok(CostKind::Soft),
            other => Err(ConfigError::UnknownCostType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostParams {
    pub q_mult: f64,
    pub desired_speed: f64,
    pub track_radius: f64,
    pub track_half_width: f64,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            q_mult: 1.0,
            desired_speed: 3.0,
            track_radius: 2.0,
            track_half_width: 0.5,
        }
    }
}

/// 円形コースを目標速度で周回するためのコスト
#[derive(Debug, Clone, Copy)]
pub struct TrackCost {
    pub kind: CostKind,
    pub params: CostParams,
}

impl TrackCost {
    const OFF_TRACK_PENALTY: f64 = 1000.0;
    const DEVIATION_WEIGHT: f64 = 100.0;

    pub fn new(kind: CostKind, params: CostParams) -> Self {
        Self { kind, params }
    }

    // 中心線からの符号付き距離
    fn deviation(&self, x: &State) -> f64 {
        x.fixed_rows::<2>(0).norm() - self.params.track_radius
    }
}

impl CostFunction for TrackCost {
    fn running(&self, x: &State) -> f64 {
        let speed_term = (x[3] - self.params.desired_speed).powi(2);
        let d = self.deviation(x);
        let track_term = match self.kind {
            CostKind::Hard => {
                if d.abs() > self.params.track_half_width {
                    Self::OFF_TRACK_PENALTY
                } else {
                    0.0
                }
            }
            CostKind::Soft => Self::DEVIATION_WEIGHT * d * d,
        };
        self.params.q_mult * (speed_term + track_term)
    }
}
