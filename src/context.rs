//! GPU context initialization.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects.  The `new_blocking` constructor hides the
//! asynchronous nature of requesting an adapter and device by using the
//! [`pollster`] crate.

use wgpu::{Adapter, Device, Instance, Queue};

use crate::error::{ComputeError, Result};

/// Settings for [`GpuContext`] creation.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Device label shown in graphics debuggers.
    pub label: Option<String>,
    /// Request timestamp queries when the adapter offers them.
    pub request_timestamps: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            label: Some("compute_wrap_device".into()),
            request_timestamps: true,
        }
    }
}

/// The device and its queue, plus the instance and adapter they came
/// from.  Everything a compute backend needs to submit work.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Create a new GPU context, blocking the current thread while the
    /// adapter and device requests complete.
    pub fn new_blocking(options: &ContextOptions) -> Result<Self> {
        pollster::block_on(Self::new_async(options))
    }

    /// Create a new GPU context asynchronously.
    pub async fn new_async(options: &ContextOptions) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ComputeError::NoAdapter(e.to_string()))?;
        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        // Downlevel adapters may lack compute entirely; refuse them early.
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(ComputeError::NoAdapter(format!(
                "{} does not support compute shaders",
                info.name
            )));
        }

        let mut features = wgpu::Features::empty();
        if options.request_timestamps
            && adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY)
        {
            features |= wgpu::Features::TIMESTAMP_QUERY;
        }
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: options.label.as_deref(),
                required_features: features,
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ComputeError::NoAdapter(format!("failed to create GPU device: {e}")))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}
