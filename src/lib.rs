//! # Pocket ConvNet
//!
//! Forward and backward passes for small convolutional classifiers:
//! stacks of conv-relu-pool blocks feeding affine layers and a softmax loss,
//! plus the loss of a plain linear softmax classifier.
//!
//! The crate computes scores, losses and gradients only. Data loading and the
//! optimizer belong to the caller, which updates the parameters in place
//! through [`Model::params_mut`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use pocket_convnet::{ArchitectureSpec, Evaluation, Model, MultiLayerConvNet};
//!
//! let spec = ArchitectureSpec { num_crp: 2, num_aff: 2, seed: Some(0), ..Default::default() };
//! let mut net = MultiLayerConvNet::<f32>::new(&spec)?;
//!
//! if let Evaluation::Loss { loss, grads } = net.loss(&batch, Some(&labels))? {
//!     net.params_mut().scaled_add(-1e-3, &grads)?;
//! }
//! ```

pub mod activations;
pub mod config;
mod conv2d_impl;
pub mod error;
pub mod layers;
pub mod loss;
pub mod model;
pub mod softmax;
pub mod tensor;

pub use config::ArchitectureSpec;
pub use error::{Error, Result};
pub use model::{Evaluation, LayerId, Model, MultiLayerConvNet, ParamId, ParamKind, Params};
pub use softmax::{softmax_loss_naive, softmax_loss_vectorized};
pub use tensor::Scalar;
