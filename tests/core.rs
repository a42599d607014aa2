use minitorch::approx::grad_check;
use minitorch::nn::{self, Denominator};
use minitorch::{Backend, Error, Tensor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn t(shape: &[usize], values: &[f64]) -> Tensor {
    Tensor::new(shape.to_vec(), values.to_vec(), Backend::Fast)
}

/// Distinct, well-separated values so max and relu stay differentiable.
fn sample(shape: &[usize]) -> Tensor {
    let n = shape.iter().product::<usize>();
    let values: Vec<f64> = (0..n).map(|i| ((i * 7 % 11) as f64 - 5.0) * 0.37 + 0.05).collect();
    t(shape, &values)
}

#[test]
fn test_backward_requires_single_element() {
    let x = t(&[2], &[1.0, 2.0]).requires_grad_(true);
    let y = x.mul_scalar(3.0).unwrap();
    assert!(matches!(y.backward(), Err(Error::ShapeMismatch { .. })));
    y.backward_with(&t(&[2], &[1.0, 0.5])).unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), vec![3.0, 1.5]);
}

#[test]
fn test_elementwise_gradients() {
    init_tracing();
    let a = t(&[2, 3], &[0.5, 1.5, 2.5, 0.7, 1.1, 3.0]);
    let b = t(&[3], &[1.2, 0.8, 2.0]);
    grad_check(|x: &[Tensor]| x[0].add(&x[1]), &[a.clone(), b.clone()]);
    grad_check(|x: &[Tensor]| x[0].sub(&x[1]), &[a.clone(), b.clone()]);
    grad_check(|x: &[Tensor]| x[0].mul(&x[1]), &[a.clone(), b.clone()]);
    grad_check(|x: &[Tensor]| x[0].div(&x[1]), &[a.clone(), b.clone()]);
    grad_check(|x: &[Tensor]| x[0].log(), &[a.clone()]);
    grad_check(|x: &[Tensor]| x[0].exp(), &[a.clone()]);
    grad_check(|x: &[Tensor]| x[0].inv(), &[a.clone()]);
    grad_check(|x: &[Tensor]| x[0].pow_scalar(2.5), &[a.clone()]);
    grad_check(|x: &[Tensor]| x[0].neg()?.add_scalar(4.0), &[a]);
}

#[test]
fn test_activation_gradients() {
    let x = sample(&[3, 4]);
    grad_check(|x: &[Tensor]| x[0].sigmoid(), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].tanh(), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].relu(), &[x.clone()]);
    grad_check(|x: &[Tensor]| nn::gelu(&x[0]), &[x]);
}

#[test]
fn test_reduction_and_shape_gradients() {
    let x = sample(&[2, 3, 4]);
    grad_check(|x: &[Tensor]| x[0].sum(1), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].mean(2), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].var(0), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].permute(&[2, 0, 1])?.mul(&x[0].permute(&[2, 0, 1])?), &[x.clone()]);
    grad_check(|x: &[Tensor]| x[0].view(&[6, 4])?.sigmoid(), &[x.clone()]);
    grad_check(|x: &[Tensor]| nn::max(&x[0], 2), &[x]);
}

#[test]
fn test_matmul_gradients() {
    let a = sample(&[2, 3, 4]);
    let b = sample(&[4, 2]);
    grad_check(|x: &[Tensor]| x[0].matmul(&x[1]), &[a, b]);
}

#[test]
fn test_nn_gradients() {
    let img = sample(&[2, 1, 4, 6]);
    grad_check(|x: &[Tensor]| nn::avgpool2d(&x[0], (2, 3)), &[img.clone()]);
    grad_check(|x: &[Tensor]| nn::maxpool2d(&x[0], (2, 2)), &[img]);

    let logits = sample(&[3, 5]);
    let w = t(&[5], &[0.3, -1.2, 2.0, 0.7, -0.4]);
    grad_check(|x: &[Tensor]| nn::softmax(&x[0], 1)?.mul(&x[1]), &[logits.clone(), w.clone()]);
    grad_check(|x: &[Tensor]| nn::logsoftmax(&x[0], 1)?.mul(&x[1]), &[logits.clone(), w.clone()]);
    grad_check(|x: &[Tensor]| nn::layer_norm(&x[0], 1e-5)?.mul(&x[1]), &[logits.clone(), w.clone()]);
    grad_check(
        |x: &[Tensor]| nn::layer_norm_with(&x[0], 1e-5, Denominator::StdDev)?.mul(&x[1]),
        &[logits, w],
    );
}

#[test]
fn test_max_gradient_is_split_to_ties() {
    let x = t(&[1, 3], &[2.0, 2.0, 1.0]).requires_grad_(true);
    nn::max(&x, 1).unwrap().backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 1.0, 0.0]);
}

#[test]
fn test_dropout_gradient_follows_mask() {
    let x = Tensor::ones(vec![32], Backend::Fast).requires_grad_(true);
    let out = nn::dropout(&x, 0.5, false).unwrap();
    out.sum_all().unwrap().backward().unwrap();
    assert_eq!(x.grad().unwrap().to_vec(), out.to_vec());
}

#[test]
fn test_backends_produce_same_gradients() {
    let mut grads = Vec::new();
    for backend in [Backend::Simple, Backend::Fast] {
        let x = Tensor::new(vec![1, 1, 4, 4], (0..16).map(f64::from).collect(), backend).requires_grad_(true);
        let pooled = nn::avgpool2d(&x, (2, 2)).unwrap();
        let out = nn::softmax(&pooled.view(&[1, 4]).unwrap(), 1).unwrap();
        out.mul(&out).unwrap().sum_all().unwrap().backward().unwrap();
        grads.push(x.grad().unwrap());
    }
    assert!(grads[0].allclose(&grads[1], 1e-12));
}
