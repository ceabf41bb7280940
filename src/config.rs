//! Architecture description for [`MultiLayerConvNet`](crate::MultiLayerConvNet).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{
    activations::Activation,
    layers::{ConvParam, PoolParam},
    model::topology::Topology,
    Result,
};

/// Hyperparameters of a `[conv - relu - 2x2 max pool] x num_crp -
/// [affine] x num_aff - softmax` network.
///
/// Every field has a default, so a JSON description only needs the fields it
/// changes:
///
/// ```json
/// {
///   "input_dim": [3, 32, 32],
///   "num_crp": 2,
///   "num_aff": 2,
///   "num_filters": 16,
///   "filter_size": 3,
///   "affine_activation": "relu",
///   "seed": 7
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchitectureSpec {
    /// `(channels, height, width)` of one input image.
    pub input_dim: (usize, usize, usize),

    /// Filters in every convolution.
    pub num_filters: usize,

    /// Spatial size of the (square) convolution filters.
    pub filter_size: usize,

    /// Number of conv-relu-pool blocks.
    pub num_crp: usize,

    /// Number of affine layers, the last of which produces class scores.
    pub num_aff: usize,

    /// Width of every affine layer except the last.
    pub hidden_dim: usize,

    pub num_classes: usize,

    /// Standard deviation of the Gaussian the weights are drawn from.
    pub weight_scale: f64,

    /// L2 regularization strength.
    pub reg: f64,

    /// Nonlinearity between affine layers. `linear` keeps the hidden affine
    /// layers purely linear.
    pub affine_activation: Activation,

    /// Seed for weight initialisation; drawn from entropy when absent.
    pub seed: Option<u64>,
}

impl Default for ArchitectureSpec {
    fn default() -> Self {
        Self {
            input_dim: (3, 32, 32),
            num_filters: 32,
            filter_size: 7,
            num_crp: 1,
            num_aff: 1,
            hidden_dim: 100,
            num_classes: 10,
            weight_scale: 1e-3,
            reg: 0.0,
            affine_activation: Activation::Linear,
            seed: None,
        }
    }
}

impl ArchitectureSpec {
    /// Parses and validates a JSON architecture description.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: ArchitectureSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Reads the file at `path` and parses it with [`ArchitectureSpec::from_json`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Fails with [`Error::Configuration`](crate::Error::Configuration) if the
    /// architecture cannot be built.
    pub fn validate(&self) -> Result<()> {
        Topology::from_spec(self).map(|_| ())
    }

    pub fn conv_param(&self) -> ConvParam {
        ConvParam::same(self.filter_size)
    }

    pub fn pool_param(&self) -> PoolParam {
        PoolParam::default()
    }
}
