//! Reverse-mode automatic differentiation.
//!
//! ## Autograd Pattern
//!
//! 1. **Forward**: a [`Function`] computes its output from the input data and
//!    stashes whatever backward needs in a [`Context`].
//! 2. **Record**: if any input requires a gradient, the output carries a
//!    [`History`] naming the function, its context and its inputs.
//! 3. **Backward**: [`backpropagate`] walks the recorded graph from the output
//!    in reverse topological order, asks each function for one gradient per
//!    input, sums gradients that meet at the same tensor, and deposits the
//!    totals on the leaves.

use std::collections::{HashMap, HashSet};

use crate::data::TensorData;
use crate::error::Result;
use crate::functions::Function;
use crate::ops::{BinaryOp, ReduceOp, dispatch};
use crate::tensors::Tensor;

/// Values saved by a forward pass for use in its backward pass.
#[derive(Debug, Clone, Default)]
pub struct Context {
    no_grad: bool,
    saved: Vec<TensorData>,
}

impl Context {
    /// A context that records saved values unless `no_grad` is set.
    pub fn new(no_grad: bool) -> Self {
        Self {
            no_grad,
            saved: Vec::new(),
        }
    }

    /// Stores tensors for backward. Ignored when gradients are disabled.
    pub fn save_for_backward(&mut self, values: impl IntoIterator<Item = TensorData>) {
        if !self.no_grad {
            self.saved.extend(values);
        }
    }

    /// Values stored by [`Context::save_for_backward`], in order.
    pub fn saved_values(&self) -> &[TensorData] {
        &self.saved
    }

    /// Whether this context was created with gradients disabled.
    pub fn no_grad(&self) -> bool {
        self.no_grad
    }
}

/// The graph edge recording how a tensor was produced.
#[derive(Debug)]
pub struct History {
    pub function: Function,
    pub ctx: Context,
    pub inputs: Vec<Tensor>,
}

/// Sums `grad` down to `shape`, undoing forward broadcasting.
///
/// # Errors
/// Propagates shape errors if `grad` is not a broadcast of `shape`.
pub fn expand(grad: TensorData, shape: &[usize], backend: crate::backend::Backend) -> Result<TensorData> {
    if grad.shape() == shape {
        return Ok(grad);
    }
    let extra = grad.dims().saturating_sub(shape.len());
    let mut g = grad;
    for dim in 0..g.dims() {
        let collapse = dim < extra || (shape[dim - extra] == 1 && g.shape()[dim] != 1);
        if collapse {
            g = dispatch::reduce(backend, ReduceOp::Sum, &g, dim)?;
        }
    }
    g.contiguous().view(shape)
}

/// All tensors reachable from `root` that require gradients, outputs first.
pub fn topological_sort(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    // iterative post-order; (tensor, children pushed)
    let mut stack = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !node.requires_grad() || !visited.insert(node.id()) {
            continue;
        }
        stack.push((node.clone(), true));
        if let Some(history) = node.history() {
            for input in &history.inputs {
                if input.requires_grad() && !visited.contains(&input.id()) {
                    stack.push((input.clone(), false));
                }
            }
        }
    }
    order.reverse();
    order
}

/// Propagates `deriv` (the gradient of the final output w.r.t. `root`)
/// backward and accumulates gradients on every leaf that requires one.
///
/// # Errors
/// Propagates any shape error raised while applying a backward rule.
pub fn backpropagate(root: &Tensor, deriv: TensorData) -> Result<()> {
    let order = topological_sort(root);
    tracing::debug!(nodes = order.len(), "backpropagate");

    let mut derivs: HashMap<usize, TensorData> = HashMap::new();
    derivs.insert(root.id(), deriv);

    for node in order {
        let Some(d) = derivs.remove(&node.id()) else {
            continue;
        };
        let Some(history) = node.history() else {
            node.accumulate_grad(d)?;
            continue;
        };
        let backend = node.backend();
        let grads = history.function.backward(&history.ctx, backend, &d)?;
        for (input, grad) in history.inputs.iter().zip(grads) {
            let Some(grad) = grad else { continue };
            if !input.requires_grad() {
                continue;
            }
            let grad = expand(grad, input.shape(), backend)?;
            let total = match derivs.remove(&input.id()) {
                Some(prev) => dispatch::zip(backend, BinaryOp::Add, &prev, &grad)?,
                None => grad,
            };
            derivs.insert(input.id(), total);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    #[test]
    fn context_respects_no_grad() {
        let mut ctx = Context::new(true);
        ctx.save_for_backward([TensorData::filled(vec![1], 1.0)]);
        assert!(ctx.saved_values().is_empty());

        let mut ctx = Context::new(false);
        ctx.save_for_backward([TensorData::filled(vec![1], 1.0)]);
        assert_eq!(ctx.saved_values().len(), 1);
    }

    #[test]
    fn expand_sums_broadcast_dims() {
        let g = TensorData::filled(vec![2, 3, 4], 1.0);
        let out = expand(g, &[3, 1], Backend::Simple).unwrap();
        assert_eq!(out.shape(), &[3, 1]);
        assert_eq!(out.to_vec(), vec![8.0, 8.0, 8.0]);
    }

    #[test]
    fn topological_sort_puts_root_first_and_skips_constants() {
        let x = Tensor::new(vec![2], vec![1.0, 2.0], Backend::Simple).requires_grad_(true);
        let c = Tensor::new(vec![2], vec![3.0, 4.0], Backend::Simple);
        let y = x.mul(&c).unwrap();
        let z = y.add(&x).unwrap();
        let order = topological_sort(&z);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].id(), z.id());
        assert_eq!(order.last().unwrap().id(), x.id());
        assert!(order.iter().all(|t| t.id() != c.id()));
    }
}
