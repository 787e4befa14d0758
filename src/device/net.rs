//! The data-parallel engine: per-layer GPU buffers and kernel dispatch.
//!
//! Each non-input layer owns storage buffers for its weights, outputs,
//! gradients and optimizer state, flattened as `neuron * (inputs + 1) +
//! connection` with the bias slot last, the same traversal order the
//! snapshot uses. Pass ordering is carried by encoder order inside one
//! submission: forward layers ascending, output then hidden gradients
//! descending, weight updates last, so every gradient lands before any
//! weight moves.

use wgpu::util::DeviceExt;

use super::{as_bytes, bytes_to_f32_slice, DeviceContext, DeviceError, KernelSet, WORKGROUP_SIZE};
use crate::activation::Activation;
use crate::error::NetError;
use crate::net::{fold_error, ConnectionState, Network, NetworkSnapshot, Topology};
use crate::optimizer::{adam_correction, Optimizer, TrainingParams, ADAM_EPSILON};

/// Per-layer geometry and activation selector, mirrored by every kernel.
#[repr(C)]
#[derive(Clone, Copy)]
struct LayerDims {
    num_inputs: u32,
    num_neurons: u32,
    activation: u32,
    pad: u32,
}

/// Buffers for one non-input layer.
struct DeviceLayer {
    num_inputs: u32,
    num_neurons: u32,
    outputs: wgpu::Buffer,
    gradients: wgpu::Buffer,
    weights: wgpu::Buffer,
    deltas: wgpu::Buffer,
    m: wgpu::Buffer,
    v: wgpu::Buffer,
    dims: wgpu::Buffer,
}

impl DeviceLayer {
    fn connection_count(&self) -> u32 {
        self.num_neurons * (self.num_inputs + 1)
    }
}

/// Data-parallel engine over a privately owned device and queue.
///
/// All numeric state lives on the GPU in `f32`; `f64` values convert at the
/// buffer boundary in both directions.
pub struct DeviceNetwork {
    ctx: DeviceContext,
    kernels: KernelSet,
    topology: Topology,
    /// Layer-0 output buffer, written from the host each forward pass.
    input_outputs: wgpu::Buffer,
    targets: wgpu::Buffer,
    layers: Vec<DeviceLayer>,
    params: TrainingParams,
    avg_error: f64,
    step: u64,
    fed_forward: bool,
}

fn storage_init(device: &wgpu::Device, label: &str, data: &[f32]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: as_bytes(data),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    })
}

impl DeviceNetwork {
    /// Builds a freshly initialized network on the accelerator.
    pub fn new(
        topology: Topology,
        optimizer: Optimizer,
        seed: Option<u64>,
    ) -> Result<Self, NetError> {
        let snapshot = NetworkSnapshot::random(topology, optimizer, seed);
        Self::from_snapshot(&snapshot)
    }

    /// Uploads existing state into fresh per-layer buffers.
    ///
    /// Fails when no adapter/device can be acquired, which is the signal the
    /// factory uses to fall back to the host engine.
    pub fn from_snapshot(snapshot: &NetworkSnapshot) -> Result<Self, NetError> {
        snapshot.check_counts()?;
        let ctx = DeviceContext::new()?;
        let kernels = KernelSet::compile(&ctx.device)?;
        let device = &ctx.device;

        let params = TrainingParams {
            optimizer: snapshot.optimizer,
            ..TrainingParams::default()
        };
        let widths = snapshot.topology.widths();

        let input_outputs = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layer0_outputs"),
            size: (widths[0] * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let targets = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("targets"),
            size: (widths[widths.len() - 1] * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut layers = Vec::with_capacity(widths.len() - 1);
        let mut records = snapshot.connections.iter();
        for pair in widths.windows(2) {
            let num_inputs = pair[0] as u32;
            let num_neurons = pair[1] as u32;
            let count = (num_neurons * (num_inputs + 1)) as usize;

            let mut weights = Vec::with_capacity(count);
            let mut deltas = Vec::with_capacity(count);
            let mut m = Vec::with_capacity(count);
            let mut v = Vec::with_capacity(count);
            for conn in records.by_ref().take(count) {
                weights.push(conn.weight as f32);
                deltas.push(conn.delta as f32);
                m.push(conn.m as f32);
                v.push(conn.v as f32);
            }

            let dims = LayerDims {
                num_inputs,
                num_neurons,
                activation: params.activation as u32,
                pad: 0,
            };
            layers.push(DeviceLayer {
                num_inputs,
                num_neurons,
                outputs: storage_init(device, "outputs", &vec![0.0f32; num_neurons as usize]),
                gradients: storage_init(device, "gradients", &vec![0.0f32; num_neurons as usize]),
                weights: storage_init(device, "weights", &weights),
                deltas: storage_init(device, "deltas", &deltas),
                m: storage_init(device, "adam_m", &m),
                v: storage_init(device, "adam_v", &v),
                dims: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("dims"),
                    contents: as_bytes(&[dims]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                }),
            });
        }

        Ok(DeviceNetwork {
            ctx,
            kernels,
            topology: snapshot.topology.clone(),
            input_outputs,
            targets,
            layers,
            params,
            avg_error: 0.0,
            step: 0,
            fed_forward: false,
        })
    }

    /// Reported compute precision of the underlying adapter.
    pub fn precision(&self) -> super::Precision {
        self.ctx.precision
    }

    /// Pushes the current activation selector into every layer's dims
    /// uniform.
    fn write_dims(&self) {
        for layer in &self.layers {
            let dims = LayerDims {
                num_inputs: layer.num_inputs,
                num_neurons: layer.num_neurons,
                activation: self.params.activation as u32,
                pad: 0,
            };
            self.ctx.queue.write_buffer(&layer.dims, 0, as_bytes(&[dims]));
        }
    }

    /// Copies a storage buffer back to the host through a staging buffer.
    fn read_buffer(&self, source: &wgpu::Buffer, count: usize) -> Result<Vec<f32>, DeviceError> {
        let device = &self.ctx.device;
        let size = (count * 4) as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| DeviceError::Readback(format!("poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| DeviceError::Readback("map callback dropped".into()))?
            .map_err(|e| DeviceError::Readback(format!("map failed: {e:?}")))?;

        let view = staging.slice(..).get_mapped_range();
        let values = bytes_to_f32_slice(&view)?.to_vec();
        drop(view);
        staging.unmap();
        Ok(values)
    }

    fn output_layer(&self) -> &DeviceLayer {
        &self.layers[self.layers.len() - 1]
    }

    /// Output buffer feeding layer index `l` of `self.layers`.
    fn inputs_of(&self, l: usize) -> &wgpu::Buffer {
        if l == 0 {
            &self.input_outputs
        } else {
            &self.layers[l - 1].outputs
        }
    }

    fn encode_update_passes(&self, encoder: &mut wgpu::CommandEncoder, correction: (f64, f64)) {
        let device = &self.ctx.device;
        for (l, layer) in self.layers.iter().enumerate() {
            let (kernel, params_buf) = match self.params.optimizer {
                Optimizer::Momentum => {
                    #[repr(C)]
                    #[derive(Clone, Copy)]
                    struct MomentumParams {
                        num_inputs: u32,
                        num_neurons: u32,
                        eta: f32,
                        alpha: f32,
                    }
                    let p = MomentumParams {
                        num_inputs: layer.num_inputs,
                        num_neurons: layer.num_neurons,
                        eta: self.params.learning_rate as f32,
                        alpha: self.params.momentum as f32,
                    };
                    (
                        &self.kernels.update_momentum,
                        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("momentum_params"),
                            contents: as_bytes(&[p]),
                            usage: wgpu::BufferUsages::UNIFORM,
                        }),
                    )
                }
                Optimizer::Adam => {
                    #[repr(C)]
                    #[derive(Clone, Copy)]
                    struct AdamParams {
                        num_inputs: u32,
                        num_neurons: u32,
                        eta: f32,
                        beta1: f32,
                        beta2: f32,
                        epsilon: f32,
                        corr1: f32,
                        corr2: f32,
                    }
                    let p = AdamParams {
                        num_inputs: layer.num_inputs,
                        num_neurons: layer.num_neurons,
                        eta: self.params.learning_rate as f32,
                        beta1: self.params.beta1 as f32,
                        beta2: self.params.beta2 as f32,
                        epsilon: ADAM_EPSILON as f32,
                        corr1: correction.0 as f32,
                        corr2: correction.1 as f32,
                    };
                    (
                        &self.kernels.update_adam,
                        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("adam_params"),
                            contents: as_bytes(&[p]),
                            usage: wgpu::BufferUsages::UNIFORM,
                        }),
                    )
                }
            };

            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.inputs_of(l).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: layer.gradients.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: layer.weights.as_entire_binding(),
                },
            ];
            match self.params.optimizer {
                Optimizer::Momentum => entries.push(wgpu::BindGroupEntry {
                    binding: 4,
                    resource: layer.deltas.as_entire_binding(),
                }),
                Optimizer::Adam => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: 4,
                        resource: layer.m.as_entire_binding(),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: 5,
                        resource: layer.v.as_entire_binding(),
                    });
                }
            }
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("update_bind_group"),
                layout: &kernel.layout,
                entries: &entries,
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("update_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(layer.connection_count().div_ceil(WORKGROUP_SIZE), 1, 1);
        }
    }
}

impl Network for DeviceNetwork {
    fn feed_forward(&mut self, inputs: &[f64]) -> Result<(), NetError> {
        let expected = self.topology.input_width();
        if inputs.len() != expected {
            return Err(NetError::ShapeMismatch {
                what: "input",
                expected,
                got: inputs.len(),
            });
        }

        let data: Vec<f32> = inputs.iter().map(|&v| v as f32).collect();
        self.ctx
            .queue
            .write_buffer(&self.input_outputs, 0, as_bytes(&data));

        let device = &self.ctx.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("feed_forward"),
        });
        for (l, layer) in self.layers.iter().enumerate() {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("feed_forward_bind_group"),
                layout: &self.kernels.feed_forward.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: layer.dims.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.inputs_of(l).as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: layer.weights.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: layer.outputs.as_entire_binding(),
                    },
                ],
            });
            // one pass per layer keeps the ascending order strict
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("feed_forward_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.kernels.feed_forward.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(layer.num_neurons.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        self.fed_forward = true;
        Ok(())
    }

    fn back_propagate(&mut self, targets: &[f64]) -> Result<(), NetError> {
        if !self.fed_forward {
            return Err(NetError::NotFedForward);
        }
        let expected = self.topology.output_width();
        if targets.len() != expected {
            return Err(NetError::ShapeMismatch {
                what: "target",
                expected,
                got: targets.len(),
            });
        }

        let target_data: Vec<f32> = targets.iter().map(|&v| v as f32).collect();
        self.ctx
            .queue
            .write_buffer(&self.targets, 0, as_bytes(&target_data));

        self.step += 1;
        let correction = adam_correction(&self.params, self.step);

        let device = &self.ctx.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("back_propagate"),
        });

        {
            let out = self.output_layer();
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("output_gradient_bind_group"),
                layout: &self.kernels.output_gradient.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: out.dims.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: out.outputs.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.targets.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: out.gradients.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("output_gradient_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.kernels.output_gradient.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(out.num_neurons.div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        // hidden gradients, last hidden layer first
        for l in (0..self.layers.len() - 1).rev() {
            let layer = &self.layers[l];
            let next = &self.layers[l + 1];
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("hidden_gradient_bind_group"),
                layout: &self.kernels.hidden_gradient.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: layer.dims.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: next.dims.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: layer.outputs.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: next.weights.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: next.gradients.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: layer.gradients.as_entire_binding(),
                    },
                ],
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("hidden_gradient_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.kernels.hidden_gradient.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(layer.num_neurons.div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        // weight updates only after every gradient pass is encoded
        self.encode_update_passes(&mut encoder, correction);
        self.ctx.queue.submit(Some(encoder.finish()));

        let outputs: Vec<f64> = self
            .read_buffer(&self.output_layer().outputs, expected)
            .map_err(NetError::Device)?
            .into_iter()
            .map(f64::from)
            .collect();
        self.avg_error = fold_error(self.avg_error, &outputs, targets);
        Ok(())
    }

    fn results(&self) -> Result<Vec<f64>, NetError> {
        if !self.fed_forward {
            return Err(NetError::NotFedForward);
        }
        let out = self.output_layer();
        let values = self
            .read_buffer(&out.outputs, out.num_neurons as usize)
            .map_err(NetError::Device)?;
        Ok(values.into_iter().map(f64::from).collect())
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn set_activation(&mut self, kind: Activation) {
        self.params.activation = kind;
        self.write_dims();
    }

    fn set_training_parameters(&mut self, params: TrainingParams) {
        self.params = params;
        self.write_dims();
    }

    fn training_parameters(&self) -> TrainingParams {
        self.params
    }

    fn recent_average_error(&self) -> f64 {
        self.avg_error
    }

    /// Reads every weight-family buffer back and reassembles the records in
    /// traversal order. Values went through `f32`, so a snapshot taken here
    /// is quantized relative to one taken from the host engine.
    fn snapshot(&self) -> Result<NetworkSnapshot, NetError> {
        let mut connections = Vec::with_capacity(self.topology.connection_count());
        for layer in &self.layers {
            let count = layer.connection_count() as usize;
            let weights = self.read_buffer(&layer.weights, count).map_err(NetError::Device)?;
            let deltas = self.read_buffer(&layer.deltas, count).map_err(NetError::Device)?;
            let m = self.read_buffer(&layer.m, count).map_err(NetError::Device)?;
            let v = self.read_buffer(&layer.v, count).map_err(NetError::Device)?;
            for i in 0..count {
                connections.push(ConnectionState {
                    weight: f64::from(weights[i]),
                    delta: f64::from(deltas[i]),
                    m: f64::from(m[i]),
                    v: f64::from(v[i]),
                });
            }
        }
        Ok(NetworkSnapshot {
            topology: self.topology.clone(),
            optimizer: self.params.optimizer,
            connections,
        })
    }
}
