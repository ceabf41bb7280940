use crate::{
    config::ArchitectureSpec,
    layers::{conv_output_size, pool_output_size},
    Error, Result,
};

/// Shapes around one conv-relu-pool block, each as `(depth, height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvBlockShape {
    pub input: (usize, usize, usize),
    pub conv_output: (usize, usize, usize),
    pub output: (usize, usize, usize),
    pub filter_size: usize,
}

impl ConvBlockShape {
    pub fn weight_shape(&self) -> (usize, usize, usize, usize) {
        (self.output.0, self.input.0, self.filter_size, self.filter_size)
    }

    pub fn bias_len(&self) -> usize {
        self.output.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineShape {
    pub fan_in: usize,
    pub fan_out: usize,
}

/// Every intermediate shape of a network, computed once from its
/// [`ArchitectureSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    input_dim: (usize, usize, usize),
    conv_blocks: Vec<ConvBlockShape>,
    affine_layers: Vec<AffineShape>,
    parameter_count: usize,
}

impl Topology {
    pub fn from_spec(spec: &ArchitectureSpec) -> Result<Self> {
        check_scalars(spec)?;

        let conv_param = spec.conv_param();
        let pool_param = spec.pool_param();

        let mut current = spec.input_dim;
        let mut conv_blocks = Vec::with_capacity(spec.num_crp);

        for block in 0..spec.num_crp {
            let (depth, height, width) = current;
            let block_error = |e: Error| {
                Error::Configuration(format!(
                    "conv-relu-pool block {} with input {:?}: {}",
                    block + 1,
                    current,
                    e
                ))
            };

            let conv_h = conv_output_size(height, spec.filter_size, &conv_param).map_err(block_error)?;
            let conv_w = conv_output_size(width, spec.filter_size, &conv_param).map_err(block_error)?;
            let pooled_h = pool_output_size(conv_h, pool_param.pool_height, pool_param.stride)
                .map_err(block_error)?;
            let pooled_w = pool_output_size(conv_w, pool_param.pool_width, pool_param.stride)
                .map_err(block_error)?;

            conv_blocks.push(ConvBlockShape {
                input: (depth, height, width),
                conv_output: (spec.num_filters, conv_h, conv_w),
                output: (spec.num_filters, pooled_h, pooled_w),
                filter_size: spec.filter_size,
            });

            current = (spec.num_filters, pooled_h, pooled_w);
        }

        let mut fan_in = checked_product(&[current.0, current.1, current.2]).ok_or_else(|| {
            Error::Configuration(format!("Flattening {:?} overflows the index range", current))
        })?;
        let mut affine_layers = Vec::with_capacity(spec.num_aff);

        for layer in 0..spec.num_aff {
            let fan_out = if layer + 1 == spec.num_aff {
                spec.num_classes
            } else {
                spec.hidden_dim
            };
            affine_layers.push(AffineShape { fan_in, fan_out });
            fan_in = fan_out;
        }

        let parameter_count = count_parameters(&conv_blocks, &affine_layers).ok_or_else(|| {
            Error::Configuration("Parameter count overflows the index range".to_string())
        })?;

        Ok(Self {
            input_dim: spec.input_dim,
            conv_blocks,
            affine_layers,
            parameter_count,
        })
    }

    pub fn input_dim(&self) -> (usize, usize, usize) {
        self.input_dim
    }

    pub fn conv_blocks(&self) -> &[ConvBlockShape] {
        &self.conv_blocks
    }

    pub fn affine_layers(&self) -> &[AffineShape] {
        &self.affine_layers
    }

    /// Width of the flattened feature vector entering the first affine layer.
    pub fn flattened_features(&self) -> usize {
        self.affine_layers.first().map_or(0, |layer| layer.fan_in)
    }

    pub fn num_classes(&self) -> usize {
        self.affine_layers.last().map_or(0, |layer| layer.fan_out)
    }

    /// Number of trainable scalars across all weights and biases.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

fn checked_product(factors: &[usize]) -> Option<usize> {
    factors.iter().try_fold(1usize, |acc, &f| acc.checked_mul(f))
}

/// Total parameter count, or `None` if it cannot be allocated: every array
/// ndarray builds must hold at most `isize::MAX` elements.
fn count_parameters(conv_blocks: &[ConvBlockShape], affine_layers: &[AffineShape]) -> Option<usize> {
    let conv = conv_blocks.iter().map(|block| {
        let (f, c, h, w) = block.weight_shape();
        checked_product(&[f, c, h, w])?.checked_add(block.bias_len())
    });
    let affine = affine_layers
        .iter()
        .map(|layer| checked_product(&[layer.fan_in, layer.fan_out])?.checked_add(layer.fan_out));

    conv.chain(affine)
        .try_fold(0usize, |acc, count| acc.checked_add(count?))
        .filter(|&total| total <= isize::MAX as usize)
}

fn check_scalars(spec: &ArchitectureSpec) -> Result<()> {
    let (channels, height, width) = spec.input_dim;
    if channels == 0 || height == 0 || width == 0 {
        return Err(Error::Configuration(format!(
            "input_dim must be positive, got {:?}",
            spec.input_dim
        )));
    }

    if spec.num_aff == 0 {
        return Err(Error::Configuration(
            "num_aff must be at least 1: the last affine layer produces the class scores"
                .to_string(),
        ));
    }

    if spec.num_classes == 0 {
        return Err(Error::Configuration("num_classes must be positive".to_string()));
    }

    if spec.num_aff > 1 && spec.hidden_dim == 0 {
        return Err(Error::Configuration(
            "hidden_dim must be positive when num_aff > 1".to_string(),
        ));
    }

    if spec.num_crp > 0 && (spec.num_filters == 0 || spec.filter_size == 0) {
        return Err(Error::Configuration(format!(
            "num_filters and filter_size must be positive, got {} and {}",
            spec.num_filters, spec.filter_size
        )));
    }

    if !spec.weight_scale.is_finite() || spec.weight_scale < 0.0 {
        return Err(Error::Configuration(format!(
            "weight_scale must be finite and non-negative, got {}",
            spec.weight_scale
        )));
    }

    if !spec.reg.is_finite() || spec.reg < 0.0 {
        return Err(Error::Configuration(format!(
            "reg must be finite and non-negative, got {}",
            spec.reg
        )));
    }

    Ok(())
}
