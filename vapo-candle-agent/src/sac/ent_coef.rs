//! Entropy coefficient of SAC.
use crate::{
    opt::{Optimizer, OptimizerConfig, OptimizerState},
    util::{lock_vars, scalar, sorted_vars, TensorData},
};
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{init::Init, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use vapo_core::error::VapoError;

const LOG_ALPHA: &str = "log_alpha";

fn default_init() -> f64 {
    1.0
}

/// Mode of the entropy coefficient of SAC.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum EntCoefMode {
    /// Use a constant as alpha.
    Fix(f64),

    /// Automatic tuning toward the target entropy `-dim(action)`.
    Auto {
        /// Initial value of alpha.
        #[serde(default = "default_init")]
        init: f64,
        /// Learning rate.
        lr: f64,
    },
}

impl Default for EntCoefMode {
    fn default() -> Self {
        Self::Auto {
            init: default_init(),
            lr: 3e-4,
        }
    }
}

/// Snapshot of an [`EntCoef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntCoefState {
    /// `ln(alpha)`.
    pub log_alpha: TensorData,

    /// `true` in [`EntCoefMode::Auto`].
    pub learned: bool,

    /// Optimizer moments in [`EntCoefMode::Auto`].
    pub opt: Option<OptimizerState>,
}

/// The entropy coefficient of SAC.
///
/// Alpha is parametrized as `exp(log_alpha)`, so it stays positive.
pub struct EntCoef {
    varmap: VarMap,
    log_alpha: Tensor,
    target_entropy: f64,
    opt: Option<Optimizer>,
}

impl EntCoef {
    /// Constructs an instance of `EntCoef`.
    ///
    /// The target entropy is `-action_dim`.
    pub fn new(mode: EntCoefMode, action_dim: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let (alpha, lr) = match mode {
            EntCoefMode::Fix(alpha) => (alpha, None),
            EntCoefMode::Auto { init, lr } => (init, Some(lr)),
        };
        if !(alpha > 0.0) || !alpha.is_finite() {
            return Err(VapoError::InvalidConfig(format!(
                "entropy coefficient must be positive, got {}",
                alpha
            ))
            .into());
        }

        let log_alpha = vb.get_with_hints(1, LOG_ALPHA, Init::Const(alpha.ln()))?;
        let opt = match lr {
            Some(lr) => Some(
                OptimizerConfig::Adam { lr }.build(sorted_vars(&varmap)?)?,
            ),
            None => None,
        };

        Ok(Self {
            varmap,
            log_alpha,
            target_entropy: -(action_dim as f64),
            opt,
        })
    }

    /// Returns the entropy coefficient.
    pub fn alpha(&self) -> Result<Tensor> {
        Ok(self.log_alpha.detach().exp()?)
    }

    /// Returns the entropy coefficient as a scalar.
    pub fn alpha_value(&self) -> Result<f32> {
        scalar(&self.alpha()?)
    }

    /// Target entropy.
    pub fn target_entropy(&self) -> f64 {
        self.target_entropy
    }

    /// Returns `true` if alpha is learned.
    pub fn is_learned(&self) -> bool {
        self.opt.is_some()
    }

    /// Update the parameter given log probabilities of sampled actions.
    ///
    /// Returns the loss, zero for a fixed coefficient.
    pub fn update(&mut self, logp: &Tensor) -> Result<f32> {
        let opt = match &mut self.opt {
            Some(opt) => opt,
            None => return Ok(0.0),
        };
        let target = (logp + self.target_entropy)?.detach();
        let loss = (self.log_alpha.broadcast_mul(&target)?.mean_all()? * -1f64)?;
        opt.backward_step(&loss)?;
        scalar(&loss)
    }

    /// Copies the coefficient and the optimizer moments.
    pub fn state(&self) -> Result<EntCoefState> {
        Ok(EntCoefState {
            log_alpha: TensorData::from_tensor(&self.log_alpha)?,
            learned: self.is_learned(),
            opt: self.opt.as_ref().map(|opt| opt.state()).transpose()?,
        })
    }

    /// Checks that `state` was taken from a coefficient of the same mode.
    pub fn check_compatible(&self, state: &EntCoefState) -> Result<()> {
        if state.learned != self.is_learned() {
            return Err(VapoError::IncompatibleCheckpoint(format!(
                "entropy coefficient learned {}, stored {}",
                self.is_learned(),
                state.learned
            ))
            .into());
        }
        if state.log_alpha.shape.as_slice() != self.log_alpha.dims() {
            return Err(VapoError::IncompatibleCheckpoint(format!(
                "entropy coefficient shape {:?}, stored {:?}",
                self.log_alpha.dims(),
                state.log_alpha.shape
            ))
            .into());
        }
        match (&self.opt, &state.opt) {
            (Some(opt), Some(s)) => opt.check_compatible(s, "entropy coefficient"),
            (None, None) => Ok(()),
            _ => Err(VapoError::IncompatibleCheckpoint(
                "entropy coefficient optimizer state".to_string(),
            )
            .into()),
        }
    }

    /// Restores a snapshot. Call [`EntCoef::check_compatible`] first.
    pub fn load_state(&mut self, state: &EntCoefState) -> Result<()> {
        self.check_compatible(state)?;
        {
            let vars = lock_vars(&self.varmap)?;
            let var = vars
                .get(LOG_ALPHA)
                .ok_or_else(|| anyhow!("{} is missing", LOG_ALPHA))?;
            var.set(&state.log_alpha.to_tensor(var.device())?)?;
        }
        if let (Some(opt), Some(s)) = (&mut self.opt, &state.opt) {
            opt.load_state(s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_fixed_coefficient() -> Result<()> {
        let mut ent_coef = EntCoef::new(EntCoefMode::Fix(0.2), 3, &Device::Cpu)?;
        let logp = Tensor::new(&[1f32, -5.0, 2.0], &Device::Cpu)?;
        assert_eq!(ent_coef.update(&logp)?, 0.0);
        assert!((ent_coef.alpha_value()? - 0.2).abs() < 1e-6);
        assert!(!ent_coef.is_learned());
        Ok(())
    }

    #[test]
    fn test_rejects_non_positive_coefficient() {
        assert!(EntCoef::new(EntCoefMode::Fix(0.0), 1, &Device::Cpu).is_err());
        assert!(EntCoef::new(EntCoefMode::Auto { init: -1.0, lr: 1e-3 }, 1, &Device::Cpu).is_err());
    }

    #[test]
    fn test_coefficient_stays_positive() -> Result<()> {
        let mode = EntCoefMode::Auto { init: 1.0, lr: 0.05 };
        let mut ent_coef = EntCoef::new(mode, 2, &Device::Cpu)?;
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let logp = (0..16)
                .map(|_| rng.gen_range(-1000f32..1000f32))
                .collect::<Vec<_>>();
            let logp = Tensor::from_vec(logp, (16,), &Device::Cpu)?;
            let loss = ent_coef.update(&logp)?;
            assert!(loss.is_finite());
            assert!(ent_coef.alpha_value()? > 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_coefficient_follows_entropy() -> Result<()> {
        let mode = EntCoefMode::Auto { init: 1.0, lr: 0.01 };

        // Entropy below the target: log probabilities above `-target_entropy`.
        let mut ent_coef = EntCoef::new(mode.clone(), 2, &Device::Cpu)?;
        let logp = Tensor::new(&[5f32, 5.0], &Device::Cpu)?;
        for _ in 0..10 {
            ent_coef.update(&logp)?;
        }
        assert!(ent_coef.alpha_value()? > 1.0);

        let mut ent_coef = EntCoef::new(mode, 2, &Device::Cpu)?;
        let logp = Tensor::new(&[-5f32, -5.0], &Device::Cpu)?;
        for _ in 0..10 {
            ent_coef.update(&logp)?;
        }
        assert!(ent_coef.alpha_value()? < 1.0);
        Ok(())
    }

    #[test]
    fn test_state_round_trip() -> Result<()> {
        let mode = EntCoefMode::Auto { init: 0.5, lr: 0.01 };
        let mut ent_coef = EntCoef::new(mode.clone(), 2, &Device::Cpu)?;
        ent_coef.update(&Tensor::new(&[3f32, 1.0], &Device::Cpu)?)?;
        let state = ent_coef.state()?;

        let mut restored = EntCoef::new(mode, 2, &Device::Cpu)?;
        restored.load_state(&state)?;
        assert_eq!(restored.alpha_value()?, ent_coef.alpha_value()?);
        assert_eq!(restored.state()?, state);

        let fixed = EntCoef::new(EntCoefMode::Fix(0.5), 2, &Device::Cpu)?;
        assert!(fixed.check_compatible(&state).is_err());
        Ok(())
    }
}
