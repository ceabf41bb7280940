use crate::layers::{AffineLayerCache, ConvReluPoolCache};

use super::params::LayerId;

/// Everything one forward pass recorded for its backward pass, keyed by
/// layer position.
///
/// A bundle belongs to the forward call that produced it. It may be fed to
/// several backward calls as long as the parameters have not changed in
/// between.
#[derive(Debug, Clone)]
pub struct Caches<A> {
    conv_blocks: Vec<ConvReluPoolCache<A>>,
    affine_layers: Vec<AffineLayerCache<A>>,
}

impl<A> Caches<A> {
    pub(crate) fn with_capacity(conv_blocks: usize, affine_layers: usize) -> Self {
        Self {
            conv_blocks: Vec::with_capacity(conv_blocks),
            affine_layers: Vec::with_capacity(affine_layers),
        }
    }

    pub(crate) fn push_conv_block(&mut self, cache: ConvReluPoolCache<A>) {
        self.conv_blocks.push(cache);
    }

    pub(crate) fn push_affine_layer(&mut self, cache: AffineLayerCache<A>) {
        self.affine_layers.push(cache);
    }

    pub fn conv_block(&self, index: usize) -> Option<&ConvReluPoolCache<A>> {
        self.conv_blocks.get(index)
    }

    pub fn affine_layer(&self, index: usize) -> Option<&AffineLayerCache<A>> {
        self.affine_layers.get(index)
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        match layer {
            LayerId::ConvReluPool(index) => index < self.conv_blocks.len(),
            LayerId::Affine(index) => index < self.affine_layers.len(),
        }
    }

    pub fn num_conv_blocks(&self) -> usize {
        self.conv_blocks.len()
    }

    pub fn num_affine_layers(&self) -> usize {
        self.affine_layers.len()
    }

    pub fn len(&self) -> usize {
        self.conv_blocks.len() + self.affine_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
