//! Optimizers.
use crate::util::TensorData;
use anyhow::Result;
use candle_core::{backprop::GradStore, Tensor, Var};
use serde::{Deserialize, Serialize};
use vapo_core::error::VapoError;

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        /// Decay rate of the first moment.
        #[serde(default = "default_beta1")]
        beta1: f64,
        /// Decay rate of the second moment.
        #[serde(default = "default_beta2")]
        beta2: f64,
        /// Term added to the denominator.
        #[serde(default = "default_eps")]
        eps: f64,
        /// Decoupled weight decay.
        #[serde(default = "default_weight_decay")]
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

fn default_weight_decay() -> f64 {
    0.01
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AdamParams {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
}

impl OptimizerConfig {
    /// Constructs the optimizer of the given named variables.
    pub fn build(&self, vars: Vec<(String, Var)>) -> Result<Optimizer> {
        let params = match *self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => AdamParams {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            OptimizerConfig::Adam { lr } => AdamParams {
                lr,
                beta1: default_beta1(),
                beta2: default_beta2(),
                eps: default_eps(),
                weight_decay: 0.0,
            },
        };
        Optimizer::new(vars, params)
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _ } => Self::Adam { lr },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 3e-4 }
    }
}

struct AdamVar {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// Moments and step count of an [`Optimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of steps taken.
    pub step_t: usize,

    /// `(name, first moment, second moment)` of every variable, sorted by name.
    pub moments: Vec<(String, TensorData, TensorData)>,
}

/// Adam with decoupled weight decay over named variables.
///
/// Its moments can be saved and restored, which makes resumed training
/// continue with the same update statistics.
pub struct Optimizer {
    vars: Vec<AdamVar>,
    step_t: usize,
    params: AdamParams,
}

impl Optimizer {
    fn new(mut vars: Vec<(String, Var)>, params: AdamParams) -> Result<Self> {
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        let vars = vars
            .into_iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let dtype = var.dtype();
                let shape = var.shape();
                let device = var.device();
                let first_moment = Var::zeros(shape, dtype, device)?;
                let second_moment = Var::zeros(shape, dtype, device)?;
                Ok(AdamVar {
                    name,
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    /// Applies a backward pass of `loss` and a step.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Updates the variables with the given gradients.
    ///
    /// Variables without a gradient in `grads` are left untouched.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let AdamParams {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));

        for var in self.vars.iter() {
            let theta = &var.var;
            let m = &var.first_moment;
            let v = &var.second_moment;
            if let Some(g) = grads.get(theta) {
                let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
                let m_hat = (&next_m * scale_m)?;
                let v_hat = (&next_v * scale_v)?;
                let next_theta = (theta.as_tensor() * (1f64 - lr * weight_decay))?;
                let adjusted_grad = (m_hat / (v_hat.sqrt()? + eps)?)?;
                let next_theta = (next_theta - (adjusted_grad * lr)?)?;
                m.set(&next_m)?;
                v.set(&next_v)?;
                theta.set(&next_theta)?;
            }
        }

        Ok(())
    }

    /// Number of steps taken.
    pub fn step_t(&self) -> usize {
        self.step_t
    }

    /// Copies the moments.
    pub fn state(&self) -> Result<OptimizerState> {
        let moments = self
            .vars
            .iter()
            .map(|v| {
                Ok((
                    v.name.clone(),
                    TensorData::from_tensor(v.first_moment.as_tensor())?,
                    TensorData::from_tensor(v.second_moment.as_tensor())?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(OptimizerState {
            step_t: self.step_t,
            moments,
        })
    }

    /// Checks that `state` was taken from an optimizer of the same variables.
    pub fn check_compatible(&self, state: &OptimizerState, label: &str) -> Result<()> {
        let incompatible = |msg: String| -> anyhow::Error {
            VapoError::IncompatibleCheckpoint(format!("{} optimizer: {}", label, msg)).into()
        };
        if state.moments.len() != self.vars.len() {
            return Err(incompatible(format!(
                "{} variables expected, {} stored",
                self.vars.len(),
                state.moments.len()
            )));
        }
        for (var, (name, m, v)) in self.vars.iter().zip(&state.moments) {
            if &var.name != name {
                return Err(incompatible(format!("expected {}, stored {}", var.name, name)));
            }
            let dims = var.var.dims();
            if m.shape.as_slice() != dims || v.shape.as_slice() != dims {
                return Err(incompatible(format!("shape of {} differs", name)));
            }
        }
        Ok(())
    }

    /// Restores the moments. Call [`Optimizer::check_compatible`] first.
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        self.check_compatible(state, "")?;
        for (var, (_, m, v)) in self.vars.iter().zip(&state.moments) {
            let device = var.var.device();
            var.first_moment.set(&m.to_tensor(device)?)?;
            var.second_moment.set(&v.to_tensor(device)?)?;
        }
        self.step_t = state.step_t;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_adam_minimizes_quadratic() -> Result<()> {
        let x = Var::from_tensor(&Tensor::new(&[3.0f32, -2.0], &Device::Cpu)?)?;
        let mut opt = OptimizerConfig::Adam { lr: 0.1 }.build(vec![("x".to_string(), x.clone())])?;
        for _ in 0..300 {
            let loss = x.as_tensor().sqr()?.sum_all()?;
            opt.backward_step(&loss)?;
        }
        let x = x.as_tensor().to_vec1::<f32>()?;
        assert!(x.iter().all(|v| v.abs() < 0.1), "{:?}", x);
        assert_eq!(opt.step_t(), 300);
        Ok(())
    }

    #[test]
    fn test_state_round_trip() -> Result<()> {
        let x = Var::ones((2, 2), DType::F32, &Device::Cpu)?;
        let mut opt = OptimizerConfig::default().build(vec![("w".to_string(), x.clone())])?;
        opt.backward_step(&x.as_tensor().sqr()?.sum_all()?)?;
        let state = opt.state()?;

        let y = Var::ones((2, 2), DType::F32, &Device::Cpu)?;
        let mut opt2 = OptimizerConfig::default().build(vec![("w".to_string(), y)])?;
        opt2.load_state(&state)?;
        assert_eq!(opt2.state()?, state);

        let z = Var::ones((3,), DType::F32, &Device::Cpu)?;
        let opt3 = OptimizerConfig::default().build(vec![("w".to_string(), z)])?;
        assert!(opt3.check_compatible(&state, "test").is_err());
        Ok(())
    }

    #[test]
    fn test_learning_rate_override() -> Result<()> {
        let adamw = OptimizerConfig::AdamW {
            lr: 1e-3,
            beta1: 0.5,
            beta2: 0.9,
            eps: 1e-6,
            weight_decay: 0.0,
        };
        assert_eq!(
            adamw.learning_rate(0.2),
            OptimizerConfig::AdamW {
                lr: 0.2,
                beta1: 0.5,
                beta2: 0.9,
                eps: 1e-6,
                weight_decay: 0.0,
            }
        );

        // The first Adam step moves each variable by the learning rate.
        let x = Var::from_tensor(&Tensor::new(&[1.0f32], &Device::Cpu)?)?;
        let config = OptimizerConfig::default().learning_rate(0.5);
        assert_eq!(config, OptimizerConfig::Adam { lr: 0.5 });
        let mut opt = config.build(vec![("x".to_string(), x.clone())])?;
        opt.backward_step(&x.as_tensor().sqr()?.sum_all()?)?;
        let x = x.as_tensor().to_vec1::<f32>()?;
        assert!((x[0] - 0.5).abs() < 1e-4, "{:?}", x);
        Ok(())
    }
}
