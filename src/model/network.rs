use ndarray::{Array2, Array4, ArrayD, Axis, CowArray, Ix2, IxDyn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, trace};

use super::{
    cache::Caches,
    params::{LayerId, Params},
    topology::Topology,
    Evaluation, Model,
};
use crate::{
    activations::Activation,
    config::ArchitectureSpec,
    layers::{Affine, ConvReluPool, Layer, Weighted},
    loss::{softmax_loss, validate_labels},
    Error, Result, Scalar,
};

/// A convolutional classifier with the layout
///
/// ```text
/// [conv - relu - 2x2 max pool] x num_crp - [affine] x num_aff - softmax
/// ```
///
/// operating on `(N, C, H, W)` minibatches.
#[derive(Debug, Clone)]
pub struct MultiLayerConvNet<A: Scalar> {
    spec: ArchitectureSpec,
    topology: Topology,
    block: ConvReluPool,
    hidden: Affine,
    output: Affine,
    params: Params<A>,
}

impl<A: Scalar> MultiLayerConvNet<A> {
    /// Builds the network, seeding initialisation from `spec.seed` when set.
    pub fn new(spec: &ArchitectureSpec) -> Result<Self> {
        let mut rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(spec, &mut rng)
    }

    pub fn with_rng<R: Rng + ?Sized>(spec: &ArchitectureSpec, rng: &mut R) -> Result<Self> {
        let topology = Topology::from_spec(spec)?;
        let params = Params::initialize(&topology, spec.weight_scale, rng)?;

        debug!(
            conv_blocks = topology.conv_blocks().len(),
            affine_layers = topology.affine_layers().len(),
            flattened_features = topology.flattened_features(),
            parameters = topology.parameter_count(),
            affine_activation = spec.affine_activation.name(),
            "built multi-layer conv net"
        );

        Ok(Self {
            spec: spec.clone(),
            topology,
            block: ConvReluPool::new(
                "conv-relu-pool".to_string(),
                spec.conv_param(),
                spec.pool_param(),
            ),
            hidden: Affine::new("affine-hidden".to_string(), spec.affine_activation),
            output: Affine::new("affine-output".to_string(), Activation::Linear),
            params,
        })
    }

    /// The classic three-layer network:
    /// `conv - relu - 2x2 max pool - affine - relu - affine - softmax`.
    ///
    /// Takes every other hyperparameter from `spec`.
    pub fn three_layer(spec: &ArchitectureSpec) -> Result<Self> {
        let spec = ArchitectureSpec {
            num_crp: 1,
            num_aff: 2,
            affine_activation: Activation::ReLU,
            ..spec.clone()
        };
        Self::new(&spec)
    }

    pub fn spec(&self) -> &ArchitectureSpec {
        &self.spec
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn affine_layer(&self, index: usize) -> &Affine {
        if index + 1 == self.params.affine_layers().len() {
            &self.output
        } else {
            &self.hidden
        }
    }

    fn check_input(&self, input: &Array4<A>) -> Result<()> {
        let (_, channels, height, width) = input.dim();
        let (expected_c, expected_h, expected_w) = self.topology.input_dim();

        if (channels, height, width) != (expected_c, expected_h, expected_w) {
            return Err(Error::ShapeMismatch {
                expected: vec![expected_c, expected_h, expected_w],
                actual: vec![channels, height, width],
            });
        }

        Ok(())
    }

    /// Class scores for a batch. Nothing is kept for a backward pass.
    pub fn scores(&self, input: &Array4<A>) -> Result<Array2<A>> {
        self.run(input, None)
    }

    /// Class scores together with every layer's cache, ready for
    /// [`backward`](Self::backward).
    pub fn forward(&self, input: &Array4<A>) -> Result<(Array2<A>, Caches<A>)> {
        let mut caches = Caches::with_capacity(
            self.params.conv_blocks().len(),
            self.params.affine_layers().len(),
        );
        let scores = self.run(input, Some(&mut caches))?;
        Ok((scores, caches))
    }

    /// Threads `input` through every conv-relu-pool block and then every
    /// affine layer, in ascending order. Caches are recorded only when a
    /// bundle is given.
    fn run(&self, input: &Array4<A>, mut caches: Option<&mut Caches<A>>) -> Result<Array2<A>> {
        self.check_input(input)?;

        let mut activations: CowArray<'_, A, IxDyn> = CowArray::from(input.view().into_dyn());

        for (index, params) in self.params.conv_blocks().iter().enumerate() {
            let layer = LayerId::ConvReluPool(index);
            let context = in_layer(layer, Layer::<A>::name(&self.block));

            let output = match caches.as_deref_mut() {
                Some(caches) => {
                    let (output, cache) = self.block.forward(activations.view(), params).map_err(context)?;
                    caches.push_conv_block(cache);
                    output
                }
                None => self.block.infer(activations.view(), params).map_err(context)?,
            };

            trace!(layer = %layer, shape = ?output.shape(), "forward");
            activations = CowArray::from(output);
        }

        for (index, params) in self.params.affine_layers().iter().enumerate() {
            let layer = LayerId::Affine(index);
            let affine = self.affine_layer(index);
            let context = in_layer(layer, Layer::<A>::name(affine));

            let output = match caches.as_deref_mut() {
                Some(caches) => {
                    let (output, cache) = affine.forward(activations.view(), params).map_err(context)?;
                    caches.push_affine_layer(cache);
                    output
                }
                None => affine.infer(activations.view(), params).map_err(context)?,
            };

            trace!(layer = %layer, shape = ?output.shape(), "forward");
            activations = CowArray::from(output);
        }

        Ok(activations.into_owned().into_dimensionality::<Ix2>()?)
    }

    /// Softmax loss of `scores` plus the L2 penalty, and the gradient of that
    /// total with respect to every parameter.
    ///
    /// `caches` must come from the [`forward`](Self::forward) call that
    /// produced `scores`, with the parameters unchanged since.
    pub fn backward(
        &self,
        scores: &Array2<A>,
        labels: &[usize],
        caches: &Caches<A>,
    ) -> Result<(A, Params<A>)> {
        let num_conv = self.params.conv_blocks().len();
        let num_affine = self.params.affine_layers().len();

        if scores.ncols() != self.topology.num_classes() {
            return Err(Error::ShapeMismatch {
                expected: vec![scores.nrows(), self.topology.num_classes()],
                actual: scores.shape().to_vec(),
            });
        }

        if caches.num_conv_blocks() != num_conv || caches.num_affine_layers() != num_affine {
            return Err(Error::Layer(format!(
                "Cache bundle holds {} conv-relu-pool and {} affine entries, network has {} and {}",
                caches.num_conv_blocks(),
                caches.num_affine_layers(),
                num_conv,
                num_affine
            )));
        }

        let (mut loss, grad_scores) = softmax_loss(scores.view(), labels)?;
        let reg = A::from_f64(self.spec.reg);

        let mut upstream: ArrayD<A> = grad_scores.into_dyn();
        let mut affine_grads = Vec::with_capacity(num_affine);
        let mut conv_grads = Vec::with_capacity(num_conv);

        for (index, params) in self.params.affine_layers().iter().enumerate().rev() {
            let layer = LayerId::Affine(index);
            let affine = self.affine_layer(index);
            let cache = caches.affine_layer(index).ok_or_else(|| missing_cache(layer))?;

            let (grad_input, mut grads) = affine
                .backward(upstream.view(), cache)
                .map_err(in_layer(layer, Layer::<A>::name(affine)))?;
            loss += add_weight_decay(&mut grads, params, reg)
                .map_err(in_layer(layer, Layer::<A>::name(affine)))?;
            trace!(layer = %layer, shape = ?grad_input.shape(), "backward");

            affine_grads.push(grads);
            upstream = grad_input;
        }

        for (index, params) in self.params.conv_blocks().iter().enumerate().rev() {
            let layer = LayerId::ConvReluPool(index);
            let cache = caches.conv_block(index).ok_or_else(|| missing_cache(layer))?;

            let (grad_input, mut grads) = self
                .block
                .backward(upstream.view(), cache)
                .map_err(in_layer(layer, Layer::<A>::name(&self.block)))?;
            loss += add_weight_decay(&mut grads, params, reg)
                .map_err(in_layer(layer, Layer::<A>::name(&self.block)))?;
            trace!(layer = %layer, shape = ?grad_input.shape(), "backward");

            conv_grads.push(grads);
            upstream = grad_input;
        }

        affine_grads.reverse();
        conv_grads.reverse();

        Ok((loss, Params::new(conv_grads, affine_grads)))
    }

    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str("Model: MultiLayerConvNet\n");
        s.push_str("_________________________________________________________________\n");
        s.push_str("Layer (type)                 Output Shape              Param #\n");
        s.push_str("=================================================================\n");

        let (c, h, w) = self.topology.input_dim();
        s.push_str(&format!("{:28} {:25} {}\n", "input", format!("{:?}", [c, h, w]), 0));

        for (index, block) in self.topology.conv_blocks().iter().enumerate() {
            let (f, d, fh, fw) = block.weight_shape();
            let (depth, height, width) = block.output;
            s.push_str(&format!(
                "{:28} {:25} {}\n",
                LayerId::ConvReluPool(index).to_string(),
                format!("{:?}", [depth, height, width]),
                f * d * fh * fw + block.bias_len()
            ));
        }

        for (index, layer) in self.topology.affine_layers().iter().enumerate() {
            let name = format!("{} ({})", LayerId::Affine(index), self.affine_layer(index).activation().name());
            s.push_str(&format!(
                "{:28} {:25} {}\n",
                name,
                format!("{:?}", [layer.fan_out]),
                layer.fan_in * layer.fan_out + layer.fan_out
            ));
        }

        s.push_str("=================================================================\n");
        s.push_str(&format!("Total params: {}\n", self.params.num_parameters()));

        s
    }
}

impl<A: Scalar> Model<A> for MultiLayerConvNet<A> {
    fn loss(&self, input: &Array4<A>, labels: Option<&[usize]>) -> Result<Evaluation<A>> {
        let Some(labels) = labels else {
            return Ok(Evaluation::Scores(self.scores(input)?));
        };

        self.check_input(input)?;
        validate_labels(labels, input.len_of(Axis(0)), self.topology.num_classes())?;

        let (scores, caches) = self.forward(input)?;
        let (loss, grads) = self.backward(&scores, labels, &caches)?;

        Ok(Evaluation::Loss { loss, grads })
    }

    fn params(&self) -> &Params<A> {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Params<A> {
        &mut self.params
    }
}

/// Adds `reg * W` to the weight gradient and returns `0.5 * reg * sum(W²)`.
///
/// A gradient computed from another network's caches can come back with a
/// different weight shape; that is an error, not a broadcast.
fn add_weight_decay<A: Scalar, P: Weighted<A>>(grads: &mut P, params: &P, reg: A) -> Result<A> {
    let weight = params.weight_view();
    let mut grad = grads.weight_view_mut();

    if grad.shape() != weight.shape() {
        return Err(Error::ShapeMismatch {
            expected: weight.shape().to_vec(),
            actual: grad.shape().to_vec(),
        });
    }

    grad.scaled_add(reg, &weight);
    Ok(A::from_f64(0.5) * reg * params.weight_square_sum())
}

/// Prefixes an error with the layer position and name it came from.
fn in_layer(layer: LayerId, name: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |e| Error::Layer(format!("{} ({}): {}", layer, name, e))
}

fn missing_cache(layer: LayerId) -> Error {
    Error::Layer(format!("No forward cache recorded for {}", layer))
}
