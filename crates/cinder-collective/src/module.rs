use std::marker::PhantomData;
use std::sync::Arc;

use burn::module::{AutodiffModule, Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};

use crate::{CollectiveError, Communicator, ReduceOp};

/// Averages the gradients of every float parameter of `module` across the group.
///
/// All gradients are packed into a single buffer, in the module's visiting order,
/// so one all-reduce covers the whole model. A parameter without a local gradient
/// contributes zeros.
pub fn average_gradients<B, M>(
    comm: &dyn Communicator,
    module: &M,
    grads: GradientsParams,
) -> Result<GradientsParams, CollectiveError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    if comm.size() == 1 {
        return Ok(grads);
    }

    let mut packer = GradientPacker::<B> {
        grads: &grads,
        buffer: Vec::new(),
        backend: PhantomData,
    };
    module.visit(&mut packer);
    let buffer = packer.buffer;
    let num_values = buffer.len();

    let averaged = comm.all_reduce(buffer, ReduceOp::Mean)?;
    if averaged.len() != num_values {
        return Err(CollectiveError::LengthMismatch {
            rank: comm.rank(),
            expected: num_values,
            found: averaged.len(),
        });
    }

    let mut unpacker = GradientUnpacker::<B> {
        values: &averaged,
        offset: 0,
        grads: GradientsParams::new(),
        backend: PhantomData,
    };
    module.visit(&mut unpacker);

    log::trace!(
        "Averaged {num_values} gradient values across {} workers",
        comm.size()
    );

    Ok(unpacker.grads)
}

/// Replaces every float parameter of `module` with the value held by `root`.
///
/// Used once before training so that every worker starts from the same weights.
pub fn broadcast_module<B, M>(
    comm: &dyn Communicator,
    module: M,
    root: usize,
) -> Result<M, CollectiveError>
where
    B: Backend,
    M: Module<B>,
{
    if root >= comm.size() {
        return Err(CollectiveError::InvalidRoot {
            root,
            size: comm.size(),
        });
    }
    if comm.size() == 1 {
        return Ok(module);
    }

    let mut packer = ParamPacker::<B> {
        buffer: Vec::new(),
        backend: PhantomData,
    };
    module.visit(&mut packer);
    let num_values = packer.buffer.len();

    let values = comm.broadcast(packer.buffer, root)?;
    if values.len() != num_values {
        return Err(CollectiveError::LengthMismatch {
            rank: root,
            expected: num_values,
            found: values.len(),
        });
    }

    log::debug!(
        "Rank {} received {num_values} parameter values from rank {root}",
        comm.rank()
    );

    let mut unpacker = ParamUnpacker::<B> {
        values: &values,
        offset: 0,
        backend: PhantomData,
    };
    Ok(module.map(&mut unpacker))
}

/// An optimizer whose steps use gradients averaged over every worker of the group.
pub struct DistributedOptimizer<O, M, B> {
    inner: O,
    comm: Arc<dyn Communicator>,
    phantom: PhantomData<(M, B)>,
}

impl<O, M, B> DistributedOptimizer<O, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(inner: O, comm: Arc<dyn Communicator>) -> Self {
        Self {
            inner,
            comm,
            phantom: PhantomData,
        }
    }

    /// Averages `grads` across the group, then applies the wrapped optimizer.
    pub fn step(
        &mut self,
        lr: f64,
        module: M,
        grads: GradientsParams,
    ) -> Result<M, CollectiveError> {
        let grads = average_gradients::<B, M>(self.comm.as_ref(), &module, grads)?;
        Ok(self.inner.step(lr, module, grads))
    }

    pub fn communicator(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

struct GradientPacker<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    buffer: Vec<f32>,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientPacker<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        match self.grads.get::<B::InnerBackend, D>(id) {
            Some(grad) => self.buffer.extend(grad.into_data().iter::<f32>()),
            None => {
                let num_elements = tensor.shape().num_elements();
                self.buffer.extend(std::iter::repeat(0.0).take(num_elements));
            }
        }
    }
}

struct GradientUnpacker<'a, B: AutodiffBackend> {
    values: &'a [f32],
    offset: usize,
    grads: GradientsParams,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientUnpacker<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let inner = tensor.clone().inner();
        let shape = inner.shape();
        let end = self.offset + shape.num_elements();
        let data = TensorData::new(self.values[self.offset..end].to_vec(), shape.dims)
            .convert::<<B::InnerBackend as Backend>::FloatElem>();
        self.offset = end;

        let grad = Tensor::<B::InnerBackend, D>::from_data(data, &inner.device());
        self.grads.register::<B::InnerBackend, D>(id, grad);
    }
}

struct ParamPacker<B: Backend> {
    buffer: Vec<f32>,
    backend: PhantomData<B>,
}

impl<B: Backend> ModuleVisitor<B> for ParamPacker<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.buffer.extend(tensor.to_data().iter::<f32>());
    }
}

struct ParamUnpacker<'a, B: Backend> {
    values: &'a [f32],
    offset: usize,
    backend: PhantomData<B>,
}

impl<B: Backend> ModuleMapper<B> for ParamUnpacker<'_, B> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let shape = tensor.shape();
        let device = tensor.device();
        let is_require_grad = tensor.is_require_grad();

        let end = self.offset + shape.num_elements();
        let data = TensorData::new(self.values[self.offset..end].to_vec(), shape.dims)
            .convert::<B::FloatElem>();
        self.offset = end;

        let mut tensor = Tensor::from_data(data, &device);
        if is_require_grad {
            tensor = tensor.require_grad();
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "local-group")]
    use crate::LocalGroup;
    use crate::Standalone;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};
    #[cfg(feature = "local-group")]
    use std::thread;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
        let data = tensor.into_data();
        data.iter::<f32>().collect()
    }

    fn assert_close(lhs: &[f32], rhs: &[f32]) {
        assert_eq!(lhs.len(), rhs.len());
        for (a, b) in lhs.iter().zip(rhs) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
    }

    fn local_gradients(layer: &Linear<TestBackend>, scale: f32) -> GradientsParams {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::ones([3, 4], &device) * scale;
        let loss = layer.forward(input).powf_scalar(2.0).sum();
        GradientsParams::from_grads(loss.backward(), layer)
    }

    #[test]
    fn standalone_keeps_gradients() {
        let device = Default::default();
        let layer = LinearConfig::new(4, 2).init::<TestBackend>(&device);
        let grads = local_gradients(&layer, 1.0);
        let expected = values(grads.get::<NdArray<f32>, 2>(layer.weight.id).unwrap());

        let grads = average_gradients::<TestBackend, _>(&Standalone, &layer, grads).unwrap();

        let actual = values(grads.get::<NdArray<f32>, 2>(layer.weight.id).unwrap());
        assert_close(&actual, &expected);
    }

    #[cfg(feature = "local-group")]
    #[test]
    fn broadcast_aligns_parameters_with_root() {
        let peers = LocalGroup::new(2).into_peers();

        let weights: Vec<(Vec<f32>, bool)> = thread::scope(|scope| {
            let handles: Vec<_> = peers
                .into_iter()
                .map(|peer| {
                    scope.spawn(move || {
                        let device = Default::default();
                        let layer = LinearConfig::new(4, 2).init::<TestBackend>(&device);
                        let layer = broadcast_module::<TestBackend, _>(&peer, layer, 0).unwrap();
                        let weight = layer.weight.val();
                        (values(weight.clone()), weight.is_require_grad())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_close(&weights[0].0, &weights[1].0);
        assert!(weights.iter().all(|(_, require_grad)| *require_grad));
    }

    #[cfg(feature = "local-group")]
    #[test]
    fn gradients_are_averaged_across_ranks() {
        let peers = LocalGroup::new(2).into_peers();

        let results: Vec<(Vec<f32>, Vec<f32>)> = thread::scope(|scope| {
            let handles: Vec<_> = peers
                .into_iter()
                .map(|peer| {
                    scope.spawn(move || {
                        let device = Default::default();
                        let layer = LinearConfig::new(4, 2).init::<TestBackend>(&device);
                        let layer = broadcast_module::<TestBackend, _>(&peer, layer, 0).unwrap();

                        let grads = local_gradients(&layer, (peer.rank() + 1) as f32);
                        let id = layer.weight.id;
                        let local = values(grads.get::<NdArray<f32>, 2>(id).unwrap());
                        let averaged = average_gradients::<TestBackend, _>(&peer, &layer, grads).unwrap();
                        let averaged = values(averaged.get::<NdArray<f32>, 2>(id).unwrap());
                        (local, averaged)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected: Vec<f32> = results[0]
            .0
            .iter()
            .zip(&results[1].0)
            .map(|(a, b)| (a + b) / 2.0)
            .collect();

        assert_close(&results[0].1, &expected);
        assert_close(&results[1].1, &expected);
    }

    #[test]
    fn broadcast_rejects_root_outside_group() {
        let device = Default::default();
        let layer = LinearConfig::new(4, 2).init::<TestBackend>(&device);

        let result = broadcast_module::<TestBackend, _>(&Standalone, layer, 1);

        assert!(matches!(
            result,
            Err(CollectiveError::InvalidRoot { root: 1, size: 1 })
        ));
    }
}
