extern crate nalgebra as na;

pub mod config;
pub mod cost;
pub mod dynamics;
pub mod gaussian;
pub mod mppi;
pub mod noise;
pub mod recorder;
pub mod report;
pub mod simulation;

/// 状態 [px, py, ψ, v]
pub type State = na::Vector4<f64>;
/// 入力 [ω, a]
pub type Control = na::Vector2<f64>;
/// 制御ホライゾン分の入力列 (1列 = 1ステップ)
pub type ControlSequence = na::Matrix2xX<f64>;
/// 乱数ストリーム (ノイズとプランナで共有)
pub type SimRng = rand_xoshiro::Xoshiro256PlusPlus;

pub use config::{ConfigError, SimConfig};
pub use cost::{CostFunction, CostKind, CostParams, TrackCost};
pub use dynamics::{Dynamics, Unicycle};
pub use mppi::{Mppi, Plan, Planner, PlannerError};
pub use noise::NoiseModel;
pub use recorder::{Recorder, RunSummary};
pub use simulation::{SimError, Simulation, Termination};

/// シード値から乱数ストリームを生成する
pub fn seeded_rng(seed: u64) -> SimRng {
    use rand::SeedableRng;
    SimRng::seed_from_u64(seed)
}
