//! Device capacity probing.
//!
//! Capacity is only used to pick a default memory budget when none is
//! configured; the registry itself accounts memory from declared footprints.

use std::process::Command;

use sysinfo::System;
use tracing::{debug, warn};
use voxrelay_core::{DevicePlacement, ServiceConfig};

/// Budget used when the device cannot be probed.
pub const FALLBACK_BUDGET_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Total memory of the placement's device, in bytes.
///
/// CPU uses system RAM. CUDA asks `nvidia-smi` for the given ordinal.
/// Metal shares system memory, of which roughly three quarters is usable
/// by the GPU.
#[must_use]
pub fn device_capacity_bytes(device: DevicePlacement) -> Option<u64> {
    match device {
        DevicePlacement::Cpu => total_ram_bytes(),
        DevicePlacement::Cuda(ordinal) => nvidia_vram_bytes(ordinal),
        DevicePlacement::Metal => total_ram_bytes().map(|ram| ram / 4 * 3),
    }
}

/// Budget for a registry: the configured value, else three quarters of the
/// probed capacity, else [`FALLBACK_BUDGET_BYTES`].
#[must_use]
pub fn resolve_budget_bytes(config: &ServiceConfig) -> u64 {
    if let Some(bytes) = config.memory_budget_bytes() {
        return bytes;
    }
    if let Some(capacity) = device_capacity_bytes(config.device) {
        let budget = capacity / 4 * 3;
        debug!(device = %config.device, capacity_bytes = capacity, budget_bytes = budget, "Derived memory budget");
        return budget;
    }
    warn!(
        device = %config.device,
        budget_bytes = FALLBACK_BUDGET_BYTES,
        "Could not probe device memory, using fallback budget"
    );
    FALLBACK_BUDGET_BYTES
}

fn total_ram_bytes() -> Option<u64> {
    let sys = System::new_all();
    let total = sys.total_memory();
    (total > 0).then_some(total)
}

/// VRAM of one NVIDIA GPU via `nvidia-smi`.
fn nvidia_vram_bytes(ordinal: u32) -> Option<u64> {
    let id_arg = format!("--id={ordinal}");
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=memory.total",
            "--format=csv,noheader,nounits",
            id_arg.as_str(),
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_nvidia_mib(&String::from_utf8_lossy(&output.stdout))
}

/// nvidia-smi reports MiB, one line per GPU.
fn parse_nvidia_mib(stdout: &str) -> Option<u64> {
    let mib: u64 = stdout.lines().next()?.trim().parse().ok()?;
    Some(mib * 1024 * 1024)
}
