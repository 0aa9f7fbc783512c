use std::future::Future;

use anyhow::Result;

use crate::ModelLike;

/// Two-phase model construction: `fetch` resolves the weights (possibly
/// downloading them), `build` binds them to a device and configures the
/// pipeline.
pub trait Loader {
    type Weights;
    type Model: ModelLike;

    fn fetch(&self) -> impl Future<Output = Result<Self::Weights>>;

    fn build(&self, weights: Self::Weights) -> Result<Self::Model>;
}
