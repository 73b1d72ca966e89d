//! The compile pipeline.
//!
//! Runs, per function: the SPMD legality check, lifetime-stop insertion,
//! stack assignment, barrier insertion, work-group sizing, and the lowering
//! to OpenCL-C. The generated source plus compiler options go to an
//! external device compiler behind the [`DeviceCompiler`] trait; the result
//! is a [`Binary`] with per-kernel metadata.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tenc_ir::{check_ir, CoreFeatureFlags, Program};

use crate::analysis::{alias_analysis, insert_lifetime_stops, set_stack_ptrs};
use crate::device::CoreInfo;
use crate::error::Error;
use crate::pass::{insert_barriers, lower_function, set_work_group_size};

/// Output container format of a compiled kernel bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// A SPIR-V module (consumed through Level Zero).
    Spirv,
    /// A native device binary (produced through the OpenCL offline path).
    Native,
}

/// Per-kernel launch metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMetadata {
    /// Required subgroup size.
    pub subgroup_size: u32,
    /// Required work-group size `[x, y]` (z is the batch axis and always 1).
    pub work_group_size: [u32; 2],
}

/// Generated OpenCL-C plus everything the device compiler needs.
#[derive(Debug, Clone)]
pub struct CompilerArtifact {
    /// OpenCL-C source with extension pragmas.
    pub source: String,
    /// Baseline compiler options (without bundle-format-specific flags).
    pub options: Vec<String>,
    /// Required OpenCL-C extensions.
    pub extensions: Vec<String>,
    /// Launch metadata per kernel name.
    pub metadata: BTreeMap<String, KernelMetadata>,
    /// Union of the core features the program's functions require.
    pub core_features: CoreFeatureFlags,
}

/// A compiled device binary plus metadata.
#[derive(Debug, Clone)]
pub struct Binary {
    /// Container format of `blob`.
    pub format: BundleFormat,
    /// SPIR-V module or native device binary.
    pub blob: Vec<u8>,
    /// Launch metadata per kernel name.
    pub metadata: BTreeMap<String, KernelMetadata>,
    /// Core features active at compile time.
    pub core_features: CoreFeatureFlags,
}

/// Options always passed to the device compiler.
pub const DEFAULT_COMPILER_OPTIONS: &[&str] = &["-cl-std=CL2.0", "-cl-mad-enable"];
/// Large-register-file option of the OpenCL compiler.
pub const LARGE_REGISTER_FILE_OPTION_CL: &str = "-cl-intel-256-GRF-per-thread";
/// Large-register-file option of the Level Zero compiler.
pub const LARGE_REGISTER_FILE_OPTION_ZE: &str = "-ze-opt-large-register-file";

/// Compiler options for a bundle format and feature set.
pub fn compiler_options(format: BundleFormat, features: CoreFeatureFlags) -> Vec<String> {
    let mut options: Vec<String> = DEFAULT_COMPILER_OPTIONS
        .iter()
        .map(|s| s.to_string())
        .collect();
    if features.contains(CoreFeatureFlags::LARGE_REGISTER_FILE) {
        options.push(
            match format {
                BundleFormat::Spirv => LARGE_REGISTER_FILE_OPTION_ZE,
                BundleFormat::Native => LARGE_REGISTER_FILE_OPTION_CL,
            }
            .to_string(),
        );
    }
    options
}

/// The embedded OpenCL-C compiler, provided by the runtime layer.
pub trait DeviceCompiler {
    /// Compile `source` to a binary in `format`.
    ///
    /// `ip_version` may be 0 for [`BundleFormat::Spirv`]. On failure the
    /// build log is returned.
    fn compile(
        &self,
        source: &str,
        format: BundleFormat,
        ip_version: u32,
        options: &[String],
        extensions: &[String],
    ) -> Result<Vec<u8>, String>;
}

/// Run the pass pipeline and produce OpenCL-C for every function of `prog`.
pub fn compile_to_opencl(
    prog: &mut Program,
    info: &CoreInfo,
) -> Result<CompilerArtifact, Error> {
    let mut module = tenc_clc::Module::default();
    let mut metadata = BTreeMap::new();
    let mut core_features = CoreFeatureFlags::empty();

    let (ctx, funcs) = prog.split_mut();
    for func in funcs.iter_mut() {
        core_features |= func.core_features();
        let mut func_info = info.clone();
        func_info.set_core_feature(func.core_features());

        check_ir(func)?;
        let aa = alias_analysis(func, None);
        insert_lifetime_stops(func, &aa);
        let stack = set_stack_ptrs(ctx, func);
        let aa = alias_analysis(func, Some(&stack));
        insert_barriers(ctx, func, &aa);
        set_work_group_size(ctx, func, &func_info)?;
        let lowered = lower_function(ctx, func, &stack)?;

        metadata.insert(
            func.name().to_string(),
            KernelMetadata {
                subgroup_size: func.subgroup_size(),
                work_group_size: func.work_group_size(),
            },
        );
        module.kernels.push(lowered.kernel);
    }

    let mut extensions: Vec<String> = tenc_clc::required_extensions(&module)
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    // fp64 is always requested, matching the option baseline.
    if !extensions.iter().any(|e| e == "cl_khr_fp64") {
        extensions.push("cl_khr_fp64".to_string());
    }

    let mut source = String::new();
    for ext in &extensions {
        let _ = writeln!(source, "#pragma OPENCL EXTENSION {ext} : enable");
    }
    source.push('\n');
    source.push_str(&tenc_clc::print_module(&module));

    Ok(CompilerArtifact {
        source,
        options: DEFAULT_COMPILER_OPTIONS.iter().map(|s| s.to_string()).collect(),
        extensions,
        metadata,
        core_features,
    })
}

/// Compile `prog` all the way to a device binary via `backend`.
pub fn compile_to_binary(
    prog: &mut Program,
    info: &CoreInfo,
    format: BundleFormat,
    backend: &dyn DeviceCompiler,
) -> Result<Binary, Error> {
    let artifact = compile_to_opencl(prog, info)?;
    let options = compiler_options(format, artifact.core_features);
    let blob = match backend.compile(
        &artifact.source,
        format,
        info.ip_version(),
        &options,
        &artifact.extensions,
    ) {
        Ok(blob) => blob,
        Err(log) => {
            // Surface the build log through the context's error reporter.
            prog.context_mut().report(&log, None);
            return Err(Error::Backend { log });
        }
    };
    Ok(Binary {
        format,
        blob,
        metadata: artifact.metadata,
        core_features: artifact.core_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IntelGpuArchitecture;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tenc_ir::ProgramBuilder;

    struct FailingCompiler;

    impl DeviceCompiler for FailingCompiler {
        fn compile(
            &self,
            _source: &str,
            _format: BundleFormat,
            _ip_version: u32,
            _options: &[String],
            _extensions: &[String],
        ) -> Result<Vec<u8>, String> {
            Err("error: undefined identifier".to_string())
        }
    }

    #[test]
    fn backend_failures_surface_through_the_reporter() {
        let mut pb = ProgramBuilder::new();
        pb.create_function("noop", &[], |_| Ok(())).unwrap();
        let mut prog = pb.build();

        let reported = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = Rc::clone(&reported);
        prog.context_mut()
            .set_error_reporter(Box::new(move |msg, _loc| {
                sink.borrow_mut().push(msg.to_string());
            }));

        let info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        let err = compile_to_binary(&mut prog, &info, BundleFormat::Native, &FailingCompiler)
            .unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        assert_eq!(reported.borrow().as_slice(), ["error: undefined identifier"]);
    }

    #[test]
    fn options_follow_format_and_features() {
        let none = compiler_options(BundleFormat::Spirv, CoreFeatureFlags::empty());
        assert_eq!(none, vec!["-cl-std=CL2.0", "-cl-mad-enable"]);

        let ze = compiler_options(BundleFormat::Spirv, CoreFeatureFlags::LARGE_REGISTER_FILE);
        assert_eq!(ze.last().map(String::as_str), Some(LARGE_REGISTER_FILE_OPTION_ZE));
        let cl = compiler_options(BundleFormat::Native, CoreFeatureFlags::LARGE_REGISTER_FILE);
        assert_eq!(cl.last().map(String::as_str), Some(LARGE_REGISTER_FILE_OPTION_CL));
    }
}
