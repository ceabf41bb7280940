pub mod cache;
pub mod network;
pub mod params;
pub mod topology;

use ndarray::{Array2, Array4};

use crate::{Result, Scalar};

pub use cache::Caches;
pub use network::MultiLayerConvNet;
pub use params::{LayerId, ParamId, ParamKind, Params};
pub use topology::{AffineShape, ConvBlockShape, Topology};

/// Outcome of [`Model::loss`].
#[derive(Debug, Clone)]
pub enum Evaluation<A> {
    /// Class scores `(N, num_classes)`; returned when no labels were given.
    Scores(Array2<A>),
    /// Total loss (data loss plus L2 penalty) and one gradient per parameter.
    Loss { loss: A, grads: Params<A> },
}

impl<A: Copy> Evaluation<A> {
    pub fn scores(self) -> Option<Array2<A>> {
        match self {
            Evaluation::Scores(scores) => Some(scores),
            Evaluation::Loss { .. } => None,
        }
    }

    pub fn loss(&self) -> Option<A> {
        match self {
            Evaluation::Scores(_) => None,
            Evaluation::Loss { loss, .. } => Some(*loss),
        }
    }

    pub fn into_loss_and_grads(self) -> Option<(A, Params<A>)> {
        match self {
            Evaluation::Scores(_) => None,
            Evaluation::Loss { loss, grads } => Some((loss, grads)),
        }
    }
}

/// What an external training loop needs from a classifier: evaluate a batch
/// and reach the parameters to update them in place.
pub trait Model<A: Scalar> {
    /// Scores only when `labels` is `None`; loss and gradients otherwise.
    fn loss(&self, input: &Array4<A>, labels: Option<&[usize]>) -> Result<Evaluation<A>>;

    fn params(&self) -> &Params<A>;

    fn params_mut(&mut self) -> &mut Params<A>;
}
