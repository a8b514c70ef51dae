use crate::{Control, State};

/// 連続時間の系ダイナミクス
///
/// 状態と入力から状態の時間微分を返す。副作用を持たないこと。
/// プランナのロールアウトから並列に呼ばれるため `Sync` を要求する。
pub trait Dynamics: Sync {
    fn derivative(&self, x: &State, u: &Control) -> State;

    /// 前進オイラー法で dt だけ進める
    fn step(&self, x: &State, u: &Control, dt: f64) -> State {
        x + self.derivative(x, u) * dt
    }
}

// 車両の運動学モデル
// x = [px, py, ψ, v], u = [ω, a]
#[derive(Debug, Clone, Copy, Default)]
pub struct Unicycle;

impl Dynamics for Unicycle {
    fn derivative(&self, x: &State, u: &Control) -> State {
        let (psi, v) = (x[2], x[3]);
        State::new(v * psi.cos(), v * psi.sin(), u[0], u[1])
    }
}
