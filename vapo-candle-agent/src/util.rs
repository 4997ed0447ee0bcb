//! Utilities.
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use log::trace;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::MutexGuard,
};
use vapo_core::error::VapoError;

/// Host copy of an `f32` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Shape of the tensor.
    pub shape: Vec<usize>,

    /// Elements in row-major order.
    pub data: Vec<f32>,
}

impl TensorData {
    /// Copies a tensor to host memory.
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        Ok(Self {
            shape: t.dims().to_vec(),
            data: t.flatten_all()?.to_vec1::<f32>()?,
        })
    }

    /// Creates a tensor on `device`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, self.shape.as_slice(), device)?)
    }
}

/// Elements of a [`ColumnData`], tagged by the dtype of the tensor.
///
/// Half precision values are held as `f32`, which represents them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    BF16(Vec<f32>),
    F16(Vec<f32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Host copy of a replay buffer column that keeps the dtype of the tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnData {
    /// Shape of the tensor.
    pub shape: Vec<usize>,

    /// Elements in row-major order.
    pub values: ColumnValues,
}

impl ColumnData {
    /// Copies a tensor to host memory.
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        let flat = t.flatten_all()?;
        let values = match t.dtype() {
            DType::U8 => ColumnValues::U8(flat.to_vec1()?),
            DType::U32 => ColumnValues::U32(flat.to_vec1()?),
            DType::I64 => ColumnValues::I64(flat.to_vec1()?),
            DType::BF16 => ColumnValues::BF16(flat.to_dtype(DType::F32)?.to_vec1()?),
            DType::F16 => ColumnValues::F16(flat.to_dtype(DType::F32)?.to_vec1()?),
            DType::F32 => ColumnValues::F32(flat.to_vec1()?),
            DType::F64 => ColumnValues::F64(flat.to_vec1()?),
        };
        Ok(Self {
            shape: t.dims().to_vec(),
            values,
        })
    }

    /// Creates a tensor of the original dtype on `device`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let shape = self.shape.as_slice();
        let t = match &self.values {
            ColumnValues::U8(v) => Tensor::from_slice(v, shape, device)?,
            ColumnValues::U32(v) => Tensor::from_slice(v, shape, device)?,
            ColumnValues::I64(v) => Tensor::from_slice(v, shape, device)?,
            ColumnValues::BF16(v) => Tensor::from_slice(v, shape, device)?.to_dtype(DType::BF16)?,
            ColumnValues::F16(v) => Tensor::from_slice(v, shape, device)?.to_dtype(DType::F16)?,
            ColumnValues::F32(v) => Tensor::from_slice(v, shape, device)?,
            ColumnValues::F64(v) => Tensor::from_slice(v, shape, device)?,
        };
        Ok(t)
    }
}

/// Tensors identified by variable names.
pub type NamedTensors = BTreeMap<String, TensorData>;

/// Locks the variables of a [`VarMap`].
pub fn lock_vars(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock poisoned"))
}

/// Returns the variables of a [`VarMap`] sorted by name.
pub fn sorted_vars(varmap: &VarMap) -> Result<Vec<(String, Var)>> {
    let vars = lock_vars(varmap)?;
    let mut vars: Vec<_> = vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

/// Copies the variables whose names start with `prefix`.
pub fn named_tensors(varmap: &VarMap, prefix: &str) -> Result<NamedTensors> {
    lock_vars(varmap)?
        .iter()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| Ok((k.clone(), TensorData::from_tensor(v.as_tensor())?)))
        .collect()
}

/// Checks that `tensors` has exactly the variables of `varmap` with their shapes.
pub fn check_compatible(varmap: &VarMap, tensors: &NamedTensors, label: &str) -> Result<()> {
    let vars = lock_vars(varmap)?;
    if vars.len() != tensors.len() {
        return Err(VapoError::IncompatibleCheckpoint(format!(
            "{}: {} variables expected, {} stored",
            label,
            vars.len(),
            tensors.len()
        ))
        .into());
    }
    for (name, var) in vars.iter() {
        match tensors.get(name) {
            None => {
                return Err(VapoError::IncompatibleCheckpoint(format!(
                    "{}: variable {} is missing",
                    label, name
                ))
                .into())
            }
            Some(t) if t.shape.as_slice() != var.dims() => {
                return Err(VapoError::IncompatibleCheckpoint(format!(
                    "{}: variable {} has shape {:?}, stored {:?}",
                    label,
                    name,
                    var.dims(),
                    t.shape
                ))
                .into())
            }
            _ => {}
        }
    }
    Ok(())
}

/// Overwrites the variables of `varmap` with `tensors`.
///
/// Call [`check_compatible`] first.
pub fn restore(varmap: &VarMap, tensors: &NamedTensors) -> Result<()> {
    let vars = lock_vars(varmap)?;
    for (name, var) in vars.iter() {
        let t = tensors
            .get(name)
            .ok_or_else(|| anyhow!("variable {} is missing", name))?;
        var.set(&t.to_tensor(var.device())?)?;
    }
    Ok(())
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
///
/// With `tau == 1` the source values are copied as they are.
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("dest");
    let dest = lock_vars(dest)?;
    trace!("src");
    let src = lock_vars(src)?;

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .ok_or_else(|| anyhow!("variable {} is not in the source", k_dest))?;
        let t_src = v_src.as_tensor();
        if tau == 1.0 {
            v_dest.set(t_src)?;
        } else {
            let t_dest = v_dest.as_tensor();
            let t_dest = ((tau * t_src)? + ((1.0 - tau) * t_dest)?)?;
            v_dest.set(&t_dest)?;
        }
    }

    Ok(())
}

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> usize;

    /// Sets the  output dimension.
    fn set_out_dim(&mut self, v: usize);
}

/// Scalar value of a one-element tensor.
pub fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.flatten_all()?.to_vec1::<f32>()?[0])
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_nn::Init;

    fn varmap_with(values: &[f32]) -> Result<VarMap> {
        let vm = VarMap::new();
        let init = Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        vm.get((values.len(),), "var1", init, DType::F32, &Device::Cpu)?;
        let t = Tensor::from_slice(values, (values.len(),), &Device::Cpu)?;
        lock_vars(&vm)?
            .get("var1")
            .ok_or_else(|| anyhow!("var1"))?
            .set(&t)?;
        Ok(vm)
    }

    fn values(vm: &VarMap) -> Result<Vec<f32>> {
        Ok(lock_vars(vm)?
            .get("var1")
            .ok_or_else(|| anyhow!("var1"))?
            .as_tensor()
            .to_vec1::<f32>()?)
    }

    #[test]
    fn test_track() -> Result<()> {
        let tau = 0.7;
        let vm_src = varmap_with(&[1.0, 2.0, 3.0])?;
        let vm_dest = varmap_with(&[4.0, 5.0, 6.0])?;
        track(&vm_dest, &vm_src, tau)?;

        let expected = [0.7 * 1.0 + 0.3 * 4.0, 0.7 * 2.0 + 0.3 * 5.0, 0.7 * 3.0 + 0.3 * 6.0];
        for (v, e) in values(&vm_dest)?.iter().zip(expected) {
            assert!((v - e as f32).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_track_hard_copy() -> Result<()> {
        let src = [0.123_456_7f32, -9.87e-5, 3.0e7];
        let vm_src = varmap_with(&src)?;
        let vm_dest = varmap_with(&[4.0, 5.0, 6.0])?;
        for _ in 0..3 {
            track(&vm_dest, &vm_src, 1.0)?;
        }
        assert_eq!(values(&vm_dest)?, src.to_vec());
        Ok(())
    }

    #[test]
    fn test_track_zero_tau_keeps_target() -> Result<()> {
        let dest = [4.5f32, -0.25, 1.0e-3];
        let vm_src = varmap_with(&[1.0, 2.0, 3.0])?;
        let vm_dest = varmap_with(&dest)?;
        for _ in 0..5 {
            track(&vm_dest, &vm_src, 0.0)?;
        }
        assert_eq!(values(&vm_dest)?, dest.to_vec());
        Ok(())
    }

    #[test]
    fn test_track_moves_toward_source() -> Result<()> {
        let src = [1.0f32, -2.0, 3.0];
        let vm_src = varmap_with(&src)?;
        let vm_dest = varmap_with(&[10.0, 10.0, -10.0])?;
        let dist = |v: &[f32]| -> f32 {
            v.iter()
                .zip(src.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt()
        };

        let mut prev = dist(&values(&vm_dest)?);
        for _ in 0..20 {
            track(&vm_dest, &vm_src, 0.1)?;
            let d = dist(&values(&vm_dest)?);
            assert!(d < prev);
            prev = d;
        }
        Ok(())
    }

    #[test]
    fn test_restore_checks_shapes() -> Result<()> {
        let vm = varmap_with(&[1.0, 2.0, 3.0])?;
        let mut tensors = named_tensors(&vm, "")?;
        check_compatible(&vm, &tensors, "var")?;

        tensors.insert(
            "var1".to_string(),
            TensorData {
                shape: vec![2],
                data: vec![0.0, 0.0],
            },
        );
        let err = check_compatible(&vm, &tensors, "var").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VapoError>(),
            Some(VapoError::IncompatibleCheckpoint(_))
        ));
        Ok(())
    }
}
