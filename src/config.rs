use crate::cost::{CostKind, CostParams, TrackCost};
use crate::gaussian::CovarianceError;
use crate::mppi::MppiParams;
use crate::noise::NoiseModel;
use crate::simulation::{LoopParams, SimError};
use crate::ControlSequence;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("undefined cost function {0:?} (expected \"hard\" or \"soft\")")]
    UnknownCostType(String),
    #[error("line {line}: cannot parse {value:?} as {label}")]
    InvalidValue {
        line: usize,
        label: &'static str,
        value: String,
    },
    #[error("{name} = {value} is out of range (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("failed to read parameter file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Covariance(#[from] CovarianceError),
    #[error(transparent)]
    Simulation(#[from] SimError),
}

/// シミュレーションの設定
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// 入力ノイズの強さ μ (Σ = μI)
    pub mu: f64,
    /// サンプリング分散の倍率 ν
    pub nu: f64,
    /// サンプル数 K
    pub samples: usize,
    /// ホライゾン T
    pub horizon: usize,
    /// ステップ数 Tsim
    pub steps: usize,
    /// 温度 λ
    pub lambda: f64,
    pub dt: f64,
    pub r_exit: f64,
    pub seed: u64,
    /// 入力ノイズを加えない
    pub no_noise: bool,
    /// プロセスノイズの強さ
    pub add_noise: f64,
    pub q_mult: f64,
    pub desired_speed: f64,
    pub cost: CostKind,
    pub verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mu: 0.01,
            nu: 0.1,
            samples: 200,
            horizon: 25,
            steps: 200,
            lambda: 0.1,
            dt: 0.05,
            r_exit: 5.0,
            seed: 100,
            no_noise: false,
            add_noise: 0.0,
            q_mult: 1.0,
            desired_speed: 3.0,
            cost: CostKind::Hard,
            verbose: false,
        }
    }
}

/// パラメータファイルで設定できる項目
///
/// 1行に `ラベル : 値` の形で書く。ラベルを含む行を上から順に照合し、
/// 最初に一致したものを使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    Mu,
    Nu,
    Samples,
    Horizon,
    Steps,
    Dt,
    Lambda,
    Seed,
    QMult,
    AddNoise,
    Cost,
    DesiredSpeed,
    RExit,
    NoNoise,
}

impl ParamKey {
    pub const ALL: [ParamKey; 14] = [
        ParamKey::Mu,
        ParamKey::Nu,
        ParamKey::Samples,
        ParamKey::Horizon,
        ParamKey::Steps,
        ParamKey::Dt,
        ParamKey::Lambda,
        ParamKey::Seed,
        ParamKey::QMult,
        ParamKey::AddNoise,
        ParamKey::Cost,
        ParamKey::DesiredSpeed,
        ParamKey::RExit,
        ParamKey::NoNoise,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ParamKey::Mu => "Natural System Noise Parameter",
            ParamKey::Nu => "Control Sampling Covariance Parameter",
            ParamKey::Samples => "Number of Samples",
            ParamKey::Horizon => "MPC Horizon",
            ParamKey::Steps => "Number of Simulation Timesteps",
            ParamKey::Dt => "Discretization time-step",
            ParamKey::Lambda => "Control Cost Parameter",
            ParamKey::Seed => "Random Number Generator",
            ParamKey::QMult => "Q Multiplier",
            ParamKey::AddNoise => "Additional Noise",
            ParamKey::Cost => "Cost Type",
            ParamKey::DesiredSpeed => "Desired Speed",
            ParamKey::RExit => "Safety Exit Radius",
            ParamKey::NoNoise => "Actuation Noise Disabled",
        }
    }

    /// レポートでの表記 (パラメータファイルとして読み戻せる)
    pub fn report_label(&self) -> &'static str {
        match self {
            ParamKey::Mu => "Natural System Noise Parameter, mu",
            ParamKey::Nu => "Control Sampling Covariance Parameter, nu",
            ParamKey::Samples => "Number of Samples, K",
            ParamKey::Horizon => "MPC Horizon, T",
            ParamKey::Steps => "Number of Simulation Timesteps, iteration",
            ParamKey::Dt => "Discretization time-step, dt",
            ParamKey::Lambda => "Control Cost Parameter, Lambda",
            ParamKey::Seed => "Random Number Generator, seed",
            ParamKey::AddNoise => "Additional Noise Parameter, W",
            ParamKey::RExit => "Safety Exit Radius, Rexit",
            other => other.label(),
        }
    }

    pub fn matching(line: &str) -> Option<ParamKey> {
        Self::ALL.into_iter().find(|k| line.contains(k.label()))
    }
}

fn parse_value<T: std::str::FromStr>(
    key: ParamKey,
    line: usize,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        line,
        label: key.label(),
        value: raw.trim().to_string(),
    })
}

impl SimConfig {
    /// 1項目を文字列から設定する
    pub fn set(&mut self, key: ParamKey, line: usize, raw: &str) -> Result<(), ConfigError> {
        match key {
            ParamKey::Mu => self.mu = parse_value(key, line, raw)?,
            ParamKey::Nu => self.nu = parse_value(key, line, raw)?,
            ParamKey::Samples => self.samples = parse_value(key, line, raw)?,
            ParamKey::Horizon => self.horizon = parse_value(key, line, raw)?,
            ParamKey::Steps => self.steps = parse_value(key, line, raw)?,
            ParamKey::Dt => self.dt = parse_value(key, line, raw)?,
            ParamKey::Lambda => self.lambda = parse_value(key, line, raw)?,
            ParamKey::Seed => self.seed = parse_value(key, line, raw)?,
            ParamKey::QMult => self.q_mult = parse_value(key, line, raw)?,
            ParamKey::AddNoise => self.add_noise = parse_value(key, line, raw)?,
            ParamKey::Cost => self.cost = raw.parse()?,
            ParamKey::DesiredSpeed => self.desired_speed = parse_value(key, line, raw)?,
            ParamKey::RExit => self.r_exit = parse_value(key, line, raw)?,
            ParamKey::NoNoise => self.no_noise = parse_value(key, line, raw)?,
        }
        Ok(())
    }

    /// 設定値を文字列で返す
    pub fn get(&self, key: ParamKey) -> String {
        match key {
            ParamKey::Mu => self.mu.to_string(),
            ParamKey::Nu => self.nu.to_string(),
            ParamKey::Samples => self.samples.to_string(),
            ParamKey::Horizon => self.horizon.to_string(),
            ParamKey::Steps => self.steps.to_string(),
            ParamKey::Dt => self.dt.to_string(),
            ParamKey::Lambda => self.lambda.to_string(),
            ParamKey::Seed => self.seed.to_string(),
            ParamKey::QMult => self.q_mult.to_string(),
            ParamKey::AddNoise => self.add_noise.to_string(),
            ParamKey::Cost => self.cost.to_string(),
            ParamKey::DesiredSpeed => self.desired_speed.to_string(),
            ParamKey::RExit => self.r_exit.to_string(),
            ParamKey::NoNoise => self.no_noise.to_string(),
        }
    }

    /// パラメータファイルの内容を上書きで適用する
    ///
    /// 認識できない行は無視する。適用した項目数を返す。
    pub fn apply_params(&mut self, text: &str) -> Result<usize, ConfigError> {
        let mut applied = 0;
        for (i, line) in text.lines().enumerate() {
            let Some(key) = ParamKey::matching(line) else {
                continue;
            };
            let Some((_, raw)) = line.split_once(':') else {
                return Err(ConfigError::InvalidValue {
                    line: i + 1,
                    label: key.label(),
                    value: String::new(),
                });
            };
            self.set(key, i + 1, raw)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// パラメータファイルを読む。ファイルが無ければ何もしない
    pub fn load_param_file(&mut self, path: &Path) -> Result<bool, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("parameter file {} not found, using defaults", path.display());
                return Ok(false);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let applied = self.apply_params(&text)?;
        log::info!("loaded {} parameters from {}", applied, path.display());
        Ok(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(
            name: &'static str,
            value: f64,
            ok: bool,
            expected: &'static str,
        ) -> Result<(), ConfigError> {
            if ok && value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    name,
                    value: value.to_string(),
                    expected,
                })
            }
        }
        check("mu", self.mu, self.mu > 0.0, "> 0")?;
        check("nu", self.nu, self.nu > 0.0, "> 0")?;
        check("K", self.samples as f64, self.samples >= 1, ">= 1")?;
        check("T", self.horizon as f64, self.horizon >= 1, ">= 1")?;
        check("Tsim", self.steps as f64, self.steps >= 1, ">= 1")?;
        check("lambda", self.lambda, self.lambda > 0.0, "> 0")?;
        check("dt", self.dt, self.dt > 0.0, "> 0")?;
        check("Rexit", self.r_exit, self.r_exit > 0.0, "> 0")?;
        check("add_noise", self.add_noise, self.add_noise >= 0.0, ">= 0")?;
        check("q_mult", self.q_mult, self.q_mult >= 0.0, ">= 0")?;
        check("desired_speed", self.desired_speed, true, "a finite number")?;
        Ok(())
    }

    /// Σ = μI
    pub fn sigma(&self) -> na::Matrix2<f64> {
        na::Matrix2::identity() * self.mu
    }

    pub fn cost_function(&self) -> TrackCost {
        TrackCost::new(
            self.cost,
            CostParams {
                q_mult: self.q_mult,
                desired_speed: self.desired_speed,
                ..CostParams::default()
            },
        )
    }

    pub fn mppi_params(&self) -> MppiParams {
        MppiParams {
            samples: self.samples,
            horizon: self.horizon,
            lambda: self.lambda,
            nu: self.nu,
            dt: self.dt,
            verbose: self.verbose,
        }
    }

    pub fn loop_params(&self) -> Result<LoopParams, ConfigError> {
        Ok(LoopParams::new(
            self.steps,
            self.dt,
            self.lambda,
            self.r_exit,
            self.sigma(),
        )?)
    }

    pub fn noise_model(&self) -> Result<NoiseModel, ConfigError> {
        let noise = NoiseModel::from_intensities(self.mu, self.add_noise, self.dt)?;
        Ok(if self.no_noise {
            noise.without_actuation()
        } else {
            noise
        })
    }

    /// 初期の入力列 (全て 1)
    pub fn initial_controls(&self) -> ControlSequence {
        ControlSequence::from_element(self.horizon, 1.0)
    }
}
