//! Activation functions and their derivatives.
//!
//! Derivatives are expressed in terms of the neuron's *output* `y = f(x)`,
//! never the pre-activation sum. Both engines only ever hold outputs after a
//! forward pass, so the backward pass needs exactly this form.

/// Which nonlinearity every neuron in the network applies.
///
/// The discriminants are fixed: they ride inside GPU uniforms and the
/// persistence header as raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Activation {
    Tanh = 0,
    Sigmoid = 1,
    Relu = 2,
}

impl Activation {
    /// Applies the forward transform to a pre-activation sum.
    pub fn forward(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => x.max(0.0),
        }
    }

    /// Derivative with respect to the pre-activation, written as a function
    /// of the output `y`.
    ///
    /// Tanh: `1 - y^2`. Sigmoid: `y (1 - y)`. ReLU: `1` where the output is
    /// positive, else `0` (the output alone decides the mask).
    pub fn derivative(self, y: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
