use std::fmt;

use ndarray::{Array, Array1, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::topology::Topology;
use crate::{
    layers::{AffineParams, ConvParams, Weighted},
    Error, Result, Scalar,
};

/// Position of a layer in the network, counted from zero within its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerId {
    ConvReluPool(usize),
    Affine(usize),
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerId::ConvReluPool(index) => write!(f, "conv-relu-pool-{}", index + 1),
            LayerId::Affine(index) => write!(f, "affine-{}", index + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKind {
    Weight,
    Bias,
}

/// Key of one parameter tensor. Renders as `conv-weight-1`, `affine-bias-2`
/// and so on, numbering layers from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub layer: LayerId,
    pub kind: ParamKind,
}

impl ParamId {
    pub fn weight(layer: LayerId) -> Self {
        Self {
            layer,
            kind: ParamKind::Weight,
        }
    }

    pub fn bias(layer: LayerId) -> Self {
        Self {
            layer,
            kind: ParamKind::Bias,
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (role, index) = match self.layer {
            LayerId::ConvReluPool(index) => ("conv", index),
            LayerId::Affine(index) => ("affine", index),
        };
        let kind = match self.kind {
            ParamKind::Weight => "weight",
            ParamKind::Bias => "bias",
        };
        write!(f, "{}-{}-{}", role, kind, index + 1)
    }
}

/// Weights and biases of a network, one record per conv-relu-pool block and
/// one per affine layer.
///
/// Backward passes return their gradients in the same structure, so a
/// parameter set and a gradient set can be combined entry by entry. Shapes are
/// fixed once the set exists; values change only through the mutable views
/// handed out by [`Params::iter_mut`], [`Params::get_mut`] and
/// [`Params::scaled_add`].
#[derive(Debug, Clone, PartialEq)]
pub struct Params<A> {
    conv_blocks: Vec<ConvParams<A>>,
    affine_layers: Vec<AffineParams<A>>,
}

impl<A: Scalar> Params<A> {
    pub(crate) fn new(conv_blocks: Vec<ConvParams<A>>, affine_layers: Vec<AffineParams<A>>) -> Self {
        Self {
            conv_blocks,
            affine_layers,
        }
    }

    /// Draws every weight from `N(0, weight_scale²)` and zeroes every bias.
    pub fn initialize<R: Rng + ?Sized>(
        topology: &Topology,
        weight_scale: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let normal = Normal::new(0.0, weight_scale).map_err(|e| {
            Error::Configuration(format!("Invalid weight scale {}: {}", weight_scale, e))
        })?;

        let conv_blocks = topology
            .conv_blocks()
            .iter()
            .map(|block| ConvParams {
                weight: Array::from_shape_simple_fn(block.weight_shape(), || {
                    A::from_f64(normal.sample(&mut *rng))
                }),
                bias: Array1::zeros(block.bias_len()),
            })
            .collect();

        let affine_layers = topology
            .affine_layers()
            .iter()
            .map(|layer| AffineParams {
                weight: Array::from_shape_simple_fn((layer.fan_in, layer.fan_out), || {
                    A::from_f64(normal.sample(&mut *rng))
                }),
                bias: Array1::zeros(layer.fan_out),
            })
            .collect();

        Ok(Self::new(conv_blocks, affine_layers))
    }

    /// A set with the same layout and every entry zero.
    pub fn zeros_like(&self) -> Self {
        Self {
            conv_blocks: self
                .conv_blocks
                .iter()
                .map(|p| ConvParams {
                    weight: Array::zeros(p.weight.raw_dim()),
                    bias: Array::zeros(p.bias.raw_dim()),
                })
                .collect(),
            affine_layers: self
                .affine_layers
                .iter()
                .map(|p| AffineParams {
                    weight: Array::zeros(p.weight.raw_dim()),
                    bias: Array::zeros(p.bias.raw_dim()),
                })
                .collect(),
        }
    }

    pub fn conv_blocks(&self) -> &[ConvParams<A>] {
        &self.conv_blocks
    }

    pub fn affine_layers(&self) -> &[AffineParams<A>] {
        &self.affine_layers
    }

    /// Every parameter tensor with its key: conv blocks first, then affine
    /// layers, weight before bias within a layer.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, ArrayViewD<'_, A>)> + '_ {
        let conv = self.conv_blocks.iter().enumerate().flat_map(|(i, p)| {
            let layer = LayerId::ConvReluPool(i);
            [
                (ParamId::weight(layer), p.weight.view().into_dyn()),
                (ParamId::bias(layer), p.bias.view().into_dyn()),
            ]
        });
        let affine = self.affine_layers.iter().enumerate().flat_map(|(i, p)| {
            let layer = LayerId::Affine(i);
            [
                (ParamId::weight(layer), p.weight.view().into_dyn()),
                (ParamId::bias(layer), p.bias.view().into_dyn()),
            ]
        });
        conv.chain(affine)
    }

    /// Mutable views in the same order as [`Params::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParamId, ArrayViewMutD<'_, A>)> + '_ {
        let conv = self.conv_blocks.iter_mut().enumerate().flat_map(|(i, p)| {
            let layer = LayerId::ConvReluPool(i);
            let ConvParams { weight, bias } = p;
            [
                (ParamId::weight(layer), weight.view_mut().into_dyn()),
                (ParamId::bias(layer), bias.view_mut().into_dyn()),
            ]
        });
        let affine = self.affine_layers.iter_mut().enumerate().flat_map(|(i, p)| {
            let layer = LayerId::Affine(i);
            let AffineParams { weight, bias } = p;
            [
                (ParamId::weight(layer), weight.view_mut().into_dyn()),
                (ParamId::bias(layer), bias.view_mut().into_dyn()),
            ]
        });
        conv.chain(affine)
    }

    pub fn ids(&self) -> Vec<ParamId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn get(&self, id: ParamId) -> Option<ArrayViewD<'_, A>> {
        match (id.layer, id.kind) {
            (LayerId::ConvReluPool(i), ParamKind::Weight) => {
                self.conv_blocks.get(i).map(|p| p.weight.view().into_dyn())
            }
            (LayerId::ConvReluPool(i), ParamKind::Bias) => {
                self.conv_blocks.get(i).map(|p| p.bias.view().into_dyn())
            }
            (LayerId::Affine(i), ParamKind::Weight) => {
                self.affine_layers.get(i).map(|p| p.weight.view().into_dyn())
            }
            (LayerId::Affine(i), ParamKind::Bias) => {
                self.affine_layers.get(i).map(|p| p.bias.view().into_dyn())
            }
        }
    }

    pub fn get_mut(&mut self, id: ParamId) -> Option<ArrayViewMutD<'_, A>> {
        match (id.layer, id.kind) {
            (LayerId::ConvReluPool(i), ParamKind::Weight) => self
                .conv_blocks
                .get_mut(i)
                .map(|p| p.weight.view_mut().into_dyn()),
            (LayerId::ConvReluPool(i), ParamKind::Bias) => self
                .conv_blocks
                .get_mut(i)
                .map(|p| p.bias.view_mut().into_dyn()),
            (LayerId::Affine(i), ParamKind::Weight) => self
                .affine_layers
                .get_mut(i)
                .map(|p| p.weight.view_mut().into_dyn()),
            (LayerId::Affine(i), ParamKind::Bias) => self
                .affine_layers
                .get_mut(i)
                .map(|p| p.bias.view_mut().into_dyn()),
        }
    }

    /// Number of parameter tensors.
    pub fn len(&self) -> usize {
        2 * (self.conv_blocks.len() + self.affine_layers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.iter().map(|(_, values)| values.len()).sum()
    }

    /// `sum(W²)` over every weight tensor; biases are left out.
    pub fn weight_square_sum(&self) -> A {
        let conv = self
            .conv_blocks
            .iter()
            .fold(A::zero(), |acc, p| acc + p.weight_square_sum());
        self.affine_layers
            .iter()
            .fold(conv, |acc, p| acc + p.weight_square_sum())
    }

    /// `self += alpha * other`, entry by entry.
    ///
    /// Both sets must share one layout; nothing is modified otherwise.
    pub fn scaled_add(&mut self, alpha: A, other: &Params<A>) -> Result<()> {
        if self.len() != other.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.len()],
                actual: vec![other.len()],
            });
        }

        for ((_, mine), (_, theirs)) in self.iter().zip(other.iter()) {
            if mine.shape() != theirs.shape() {
                return Err(Error::ShapeMismatch {
                    expected: mine.shape().to_vec(),
                    actual: theirs.shape().to_vec(),
                });
            }
        }

        for ((_, mut mine), (_, theirs)) in self.iter_mut().zip(other.iter()) {
            mine.scaled_add(alpha, &theirs);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArchitectureSpec;
    use rand::{rngs::StdRng, SeedableRng};

    fn small_params() -> Params<f64> {
        let spec = ArchitectureSpec {
            input_dim: (2, 4, 4),
            num_filters: 3,
            filter_size: 3,
            num_aff: 2,
            hidden_dim: 5,
            num_classes: 4,
            ..Default::default()
        };
        let topology = Topology::from_spec(&spec).unwrap();
        Params::initialize(&topology, 0.1, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    #[test]
    fn test_param_names() {
        let params = small_params();
        let names: Vec<String> = params.ids().iter().map(|id| id.to_string()).collect();

        assert_eq!(
            names,
            vec![
                "conv-weight-1",
                "conv-bias-1",
                "affine-weight-1",
                "affine-bias-1",
                "affine-weight-2",
                "affine-bias-2",
            ]
        );
    }

    #[test]
    fn test_biases_start_at_zero() {
        let params = small_params();
        for (id, values) in params.iter() {
            if id.kind == ParamKind::Bias {
                assert!(values.iter().all(|&v| v == 0.0), "{} not zeroed", id);
            }
        }
    }

    #[test]
    fn test_zeros_like_accumulates_into_a_buffer() {
        let params = small_params();
        let mut velocity = params.zeros_like();

        assert_eq!(velocity.ids(), params.ids());
        assert_eq!(velocity.weight_square_sum(), 0.0);

        velocity.scaled_add(2.0, &params).unwrap();
        velocity.scaled_add(-1.0, &params).unwrap();
        assert_eq!(velocity, params);
    }

    #[test]
    fn test_scaled_add_rejects_other_layouts() {
        let mut params = small_params();
        let spec = ArchitectureSpec {
            num_crp: 0,
            ..Default::default()
        };
        let other_topology = Topology::from_spec(&spec).unwrap();
        let other = Params::initialize(&other_topology, 0.1, &mut StdRng::seed_from_u64(3)).unwrap();

        let before = params.clone();
        assert!(params.scaled_add(1.0, &other).is_err());
        assert_eq!(params, before);
    }
}
