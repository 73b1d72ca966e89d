//! Device capability records.
//!
//! The compiler consumes a read-only [`CoreInfo`] describing the target GPU
//! and resolves subgroup-size-dependent resources through
//! [`CoreInfo::get_core_config`]. Device *enumeration* (driver queries) is
//! the runtime's job; the records here are filled either from a known
//! architecture table or by the caller.

use tenc_ir::CoreFeatureFlags;

use crate::error::Error;

/// Core parameters for a specific choice of subgroup size and feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    /// Smallest unit of execution.
    pub subgroup_size: u32,
    /// Maximum size of the local work-group in work items.
    pub max_number_of_work_items: u32,
    /// Shared local memory per work-group in bytes.
    pub local_memory_size: u32,
    /// Register file per subgroup in bytes.
    pub register_space: u32,
    /// Device ip version.
    pub ip_version: u32,
    /// Features active when this config was resolved.
    pub core_features: CoreFeatureFlags,
}

/// Known Intel GPU architectures.
///
/// Ip versions follow the compute-runtime AOT platform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum IntelGpuArchitecture {
    /// Ponte Vecchio.
    Pvc,
}

impl IntelGpuArchitecture {
    /// Device ip version of this architecture.
    pub fn ip_version(&self) -> u32 {
        match self {
            Self::Pvc => 0x030f0007,
        }
    }
}

/// Capability record of one GPU core (subslice).
#[derive(Debug, Clone)]
pub struct CoreInfo {
    ip_version: u32,
    num_eus_per_subslice: u32,
    num_threads_per_eu: u32,
    local_memory_size: u32,
    subgroup_sizes: Vec<u32>,
    register_size: u32,
    num_registers_per_thread: u32,
    core_features: CoreFeatureFlags,
}

impl CoreInfo {
    /// Capability record from raw parameters; `subgroup_sizes` is sorted
    /// ascending.
    pub fn new(
        ip_version: u32,
        num_eus_per_subslice: u32,
        num_threads_per_eu: u32,
        local_memory_size: u32,
        mut subgroup_sizes: Vec<u32>,
    ) -> Self {
        subgroup_sizes.sort_unstable();
        let register_size = if ip_version >= IntelGpuArchitecture::Pvc.ip_version() {
            64
        } else {
            32
        };
        let mut info = Self {
            ip_version,
            num_eus_per_subslice,
            num_threads_per_eu,
            local_memory_size,
            subgroup_sizes,
            register_size,
            num_registers_per_thread: 0,
            core_features: CoreFeatureFlags::empty(),
        };
        info.num_registers_per_thread = info.num_reg_small_grf();
        info
    }

    /// Capability record for a known Intel GPU architecture.
    pub fn intel_gpu(arch: IntelGpuArchitecture) -> Self {
        match arch {
            IntelGpuArchitecture::Pvc => {
                Self::new(arch.ip_version(), 8, 8, 128 * 1024, vec![16, 32])
            }
        }
    }

    fn num_reg_small_grf(&self) -> u32 {
        128
    }

    fn num_reg_large_grf(&self) -> u32 {
        if self.ip_version >= IntelGpuArchitecture::Pvc.ip_version() {
            256
        } else {
            self.num_reg_small_grf()
        }
    }

    /// Device ip version.
    pub fn ip_version(&self) -> u32 {
        self.ip_version
    }

    /// Available subgroup sizes, ascending.
    pub fn subgroup_sizes(&self) -> &[u32] {
        &self.subgroup_sizes
    }

    /// Size of one register in bytes.
    pub fn register_size(&self) -> u32 {
        self.register_size
    }

    /// Registers available per subgroup.
    pub fn num_registers_per_thread(&self) -> u32 {
        self.num_registers_per_thread
    }

    /// Shared local memory in bytes.
    pub fn local_memory_size(&self) -> u32 {
        self.local_memory_size
    }

    /// Request a core feature. `LARGE_REGISTER_FILE` doubles the registers
    /// per thread on hardware that supports it.
    pub fn set_core_feature(&mut self, flag: CoreFeatureFlags) {
        self.core_features |= flag;
        if flag.contains(CoreFeatureFlags::LARGE_REGISTER_FILE) {
            self.num_registers_per_thread = self.num_reg_large_grf();
        }
    }

    /// Clear a core feature.
    pub fn clear_core_feature(&mut self, flag: CoreFeatureFlags) {
        self.core_features &= !flag;
        if flag.contains(CoreFeatureFlags::LARGE_REGISTER_FILE) {
            self.num_registers_per_thread = self.num_reg_small_grf();
        }
    }

    /// Active core features.
    pub fn core_features(&self) -> CoreFeatureFlags {
        self.core_features
    }

    /// Resolve the core config for a subgroup size.
    ///
    /// The available hardware threads are throttled both by register use
    /// (large GRF halves them) and by the ratio of the requested subgroup
    /// size to the smallest one.
    pub fn get_core_config(&self, subgroup_size: u32) -> Result<CoreConfig, Error> {
        if !self.subgroup_sizes.contains(&subgroup_size) {
            return Err(Error::UnsupportedSubgroupSize(subgroup_size));
        }
        let threads_due_to_register_use =
            self.num_threads_per_eu * self.num_reg_small_grf() / self.num_registers_per_thread;
        let threads_due_to_subgroup_size =
            self.num_threads_per_eu * self.subgroup_sizes[0] / subgroup_size;
        let num_threads_per_eu = threads_due_to_register_use.min(threads_due_to_subgroup_size);
        let max_number_of_work_items =
            num_threads_per_eu * self.num_eus_per_subslice * subgroup_size;
        Ok(CoreConfig {
            subgroup_size,
            max_number_of_work_items,
            local_memory_size: self.local_memory_size,
            register_space: self.register_size * self.num_registers_per_thread,
            ip_version: self.ip_version,
            core_features: self.core_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pvc_large_register_file() {
        let mut info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        assert_eq!(info.register_size(), 64);
        assert_eq!(info.num_registers_per_thread(), 128);

        info.set_core_feature(CoreFeatureFlags::LARGE_REGISTER_FILE);
        assert_eq!(info.num_registers_per_thread(), 256);

        let cfg = info.get_core_config(32).unwrap();
        assert_eq!(cfg.subgroup_size, 32);
        assert_eq!(cfg.register_space, 64 * 256);
        // 8 threads/EU throttled to 4 by both register use and subgroup size.
        assert_eq!(cfg.max_number_of_work_items, 4 * 8 * 32);

        let cfg16 = info.get_core_config(16).unwrap();
        assert_eq!(cfg16.max_number_of_work_items, 4 * 8 * 16);

        info.clear_core_feature(CoreFeatureFlags::LARGE_REGISTER_FILE);
        assert_eq!(info.num_registers_per_thread(), 128);

        assert!(matches!(
            info.get_core_config(8),
            Err(Error::UnsupportedSubgroupSize(8))
        ));
    }
}
