//! Named layer choices
//!
//! Layer nonlinearities and normalisations are closed enums resolved once
//! when a layer is configured. Unknown names are rejected on parse.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayBase, Axis, DataMut, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::SepError;

/// Elementwise layer nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Nonlinear {
    /// max(0, x)
    #[default]
    Relu,
    /// 1 / (1 + e^-x)
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Pass-through (no nonlinearity)
    Identity,
}

impl Nonlinear {
    /// Apply to a single value
    #[inline]
    pub fn apply_scalar(self, x: f32) -> f32 {
        match self {
            Nonlinear::Relu => x.max(0.0),
            Nonlinear::Sigmoid => sigmoid(x),
            Nonlinear::Tanh => x.tanh(),
            Nonlinear::Identity => x,
        }
    }

    /// Apply in place to every element of an array
    pub fn apply_inplace<S, D>(self, x: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        if self == Nonlinear::Identity {
            return;
        }
        x.mapv_inplace(|v| self.apply_scalar(v));
    }

    pub fn name(&self) -> &'static str {
        match self {
            Nonlinear::Relu => "relu",
            Nonlinear::Sigmoid => "sigmoid",
            Nonlinear::Tanh => "tanh",
            Nonlinear::Identity => "identity",
        }
    }
}

impl FromStr for Nonlinear {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Nonlinear::Relu),
            "sigmoid" => Ok(Nonlinear::Sigmoid),
            "tanh" => Ok(Nonlinear::Tanh),
            "identity" | "none" | "linear" => Ok(Nonlinear::Identity),
            other => Err(SepError::config(format!("unknown nonlinearity `{}`", other))),
        }
    }
}

impl fmt::Display for Nonlinear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalisation applied before a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    /// Per-channel batch norm with running statistics
    #[default]
    BatchNorm,
    /// Per-sample norm over channels and positions (gLN)
    GlobalLayerNorm,
}

impl FromStr for NormKind {
    type Err = SepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BN" | "bn" | "batch_norm" => Ok(NormKind::BatchNorm),
            "gLN" | "gln" | "global_layer_norm" => Ok(NormKind::GlobalLayerNorm),
            other => Err(SepError::config(format!("unknown normalization `{}`", other))),
        }
    }
}

impl fmt::Display for NormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormKind::BatchNorm => f.write_str("BN"),
            NormKind::GlobalLayerNorm => f.write_str("gLN"),
        }
    }
}

/// Logistic sigmoid
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax along `axis`, in place
pub fn softmax_inplace<S, D>(x: &mut ArrayBase<S, D>, axis: Axis)
where
    S: DataMut<Elem = f32>,
    D: Dimension,
{
    for mut lane in x.lanes_mut(axis) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
}
