//! D2 block configuration
//!
//! Every per-layer option may be given once for all layers or as a list
//! with one entry per layer. `D2BlockSpec::expand` is the only place where
//! that is resolved.

use serde::{Deserialize, Serialize};
use ss_core::{EPS, Nonlinear, NormKind, SepError, SepResult, ensure_positive};

/// A value shared by every layer, or one value per layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerLayer<T> {
    Uniform(T),
    List(Vec<T>),
}

impl<T: Clone> PerLayer<T> {
    fn list_len(&self) -> Option<usize> {
        match self {
            PerLayer::Uniform(_) => None,
            PerLayer::List(values) => Some(values.len()),
        }
    }

    fn expand(&self, depth: usize) -> Vec<T> {
        match self {
            PerLayer::Uniform(value) => vec![value.clone(); depth],
            PerLayer::List(values) => values.clone(),
        }
    }
}

macro_rules! per_layer_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PerLayer<$ty> {
                fn from(value: $ty) -> Self {
                    PerLayer::Uniform(value)
                }
            }

            impl From<Vec<$ty>> for PerLayer<$ty> {
                fn from(values: Vec<$ty>) -> Self {
                    PerLayer::List(values)
                }
            }
        )*
    };
}

per_layer_from!(usize, bool, Nonlinear);

/// One layer after expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct D2LayerSpec {
    /// Channels this layer contributes to the block output stack
    pub growth: usize,
    /// Use dilation `2^idx` instead of 1
    pub dilated: bool,
    /// Normalise the layer input
    pub norm: bool,
    pub nonlinear: Nonlinear,
}

/// Densely-connected dilated block description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct D2BlockSpec {
    pub in_channels: usize,
    pub growth: PerLayer<usize>,
    /// (height, width)
    pub kernel_size: (usize, usize),
    pub dilated: PerLayer<bool>,
    pub norm: PerLayer<bool>,
    pub nonlinear: PerLayer<Nonlinear>,
    /// Required when every per-layer option is uniform
    pub depth: Option<usize>,
    pub norm_kind: NormKind,
    pub eps: f32,
}

impl Default for D2BlockSpec {
    fn default() -> Self {
        Self {
            in_channels: 1,
            growth: PerLayer::Uniform(8),
            kernel_size: (3, 3),
            dilated: PerLayer::Uniform(true),
            norm: PerLayer::Uniform(true),
            nonlinear: PerLayer::Uniform(Nonlinear::Relu),
            depth: Some(4),
            norm_kind: NormKind::BatchNorm,
            eps: EPS,
        }
    }
}

impl D2BlockSpec {
    pub fn new(in_channels: usize, growth: impl Into<PerLayer<usize>>) -> Self {
        Self {
            in_channels,
            growth: growth.into(),
            depth: None,
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_kernel_size(mut self, kernel_size: (usize, usize)) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_dilated(mut self, dilated: impl Into<PerLayer<bool>>) -> Self {
        self.dilated = dilated.into();
        self
    }

    pub fn with_norm(mut self, norm: impl Into<PerLayer<bool>>) -> Self {
        self.norm = norm.into();
        self
    }

    pub fn with_nonlinear(mut self, nonlinear: impl Into<PerLayer<Nonlinear>>) -> Self {
        self.nonlinear = nonlinear.into();
        self
    }

    /// Resolve scalars and lists into one record per layer.
    ///
    /// The depth comes from `depth` or from any list; every list must agree
    /// with it.
    pub fn expand(&self) -> SepResult<Vec<D2LayerSpec>> {
        ensure_positive("in_channels", self.in_channels)?;
        ensure_positive("kernel height", self.kernel_size.0)?;
        ensure_positive("kernel width", self.kernel_size.1)?;

        let lists = [
            ("growth", self.growth.list_len()),
            ("dilated", self.dilated.list_len()),
            ("norm", self.norm.list_len()),
            ("nonlinear", self.nonlinear.list_len()),
        ];

        let mut depth = self.depth;
        for (name, len) in lists {
            let Some(len) = len else { continue };
            match depth {
                None => depth = Some(len),
                Some(d) if d != len => {
                    return Err(SepError::config(format!(
                        "`{}` has {} entries but depth is {}",
                        name, len, d
                    )));
                }
                Some(_) => {}
            }
        }

        let depth = depth.ok_or_else(|| {
            SepError::config("`depth` is required when every per-layer option is a scalar")
        })?;
        ensure_positive("depth", depth)?;

        let growth = self.growth.expand(depth);
        if growth.contains(&0) {
            return Err(SepError::config("every growth rate must be positive"));
        }
        let dilated = self.dilated.expand(depth);
        let norm = self.norm.expand(depth);
        let nonlinear = self.nonlinear.expand(depth);

        Ok((0..depth)
            .map(|idx| D2LayerSpec {
                growth: growth[idx],
                dilated: dilated[idx],
                norm: norm[idx],
                nonlinear: nonlinear[idx],
            })
            .collect())
    }
}
