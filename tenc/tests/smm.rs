//! Batched small-GEMM end to end: reference result, recipe pipeline, and
//! deterministic compilation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tenc::recipe::{
    ArgValue, CommandList, DeviceMem, Event, KernelLaunch, ScalarType, SmallGemmBatched,
};
use tenc::{
    compile_to_binary, BundleFormat, CoreInfo, DeviceCompiler, IntelGpuArchitecture,
    LARGE_REGISTER_FILE_OPTION_ZE,
};
use tenc_ir::{packed_strides, AddressSpace, CoreFeatureFlags, Location, ProgramBuilder, Transpose};

/// Column-major strided 3-tensor, batch in the last mode.
struct Tensor3 {
    shape: [usize; 3],
    stride: [usize; 3],
    data: Vec<f32>,
}

impl Tensor3 {
    fn new(shape: [usize; 3], stride: [usize; 3]) -> Self {
        let size = 1 + shape
            .iter()
            .zip(stride.iter())
            .map(|(&s, &st)| (s - 1) * st)
            .sum::<usize>();
        Self {
            shape,
            stride,
            data: vec![0.0; size],
        }
    }

    fn at(&self, m: usize, n: usize, j: usize) -> f32 {
        self.data[m * self.stride[0] + n * self.stride[1] + j * self.stride[2]]
    }

    fn at_mut(&mut self, m: usize, n: usize, j: usize) -> &mut f32 {
        &mut self.data[m * self.stride[0] + n * self.stride[1] + j * self.stride[2]]
    }

    fn fill_random(&mut self, rng: &mut StdRng) {
        for v in &mut self.data {
            *v = rng.gen_range(-1.0..1.0);
        }
    }
}

/// Host reference for `C_j ← α·op(A_j)·op(B_j) + β·C_j`.
#[allow(clippy::too_many_arguments)]
fn small_gemm_batched_ref(
    trans_a: Transpose,
    trans_b: Transpose,
    alpha: f32,
    a: &Tensor3,
    b: &Tensor3,
    beta: f32,
    c: &mut Tensor3,
) {
    let howmany = c.shape[2];
    assert_eq!(a.shape[2], howmany);
    assert_eq!(b.shape[2], howmany);
    let (a_rows, a_cols) = if trans_a == Transpose::T {
        (a.shape[1], a.shape[0])
    } else {
        (a.shape[0], a.shape[1])
    };
    let (b_rows, b_cols) = if trans_b == Transpose::T {
        (b.shape[1], b.shape[0])
    } else {
        (b.shape[0], b.shape[1])
    };
    assert_eq!(a_rows, c.shape[0]);
    assert_eq!(b_cols, c.shape[1]);
    assert_eq!(a_cols, b_rows);

    for j in 0..howmany {
        for n in 0..c.shape[1] {
            for m in 0..c.shape[0] {
                let mut acc = 0.0f32;
                for k in 0..a_cols {
                    let av = if trans_a == Transpose::T {
                        a.at(k, m, j)
                    } else {
                        a.at(m, k, j)
                    };
                    let bv = if trans_b == Transpose::T {
                        b.at(n, k, j)
                    } else {
                        b.at(k, n, j)
                    };
                    acc += av * bv;
                }
                *c.at_mut(m, n, j) = alpha * acc + beta * c.at(m, n, j);
            }
        }
    }
}

#[test]
fn reference_matches_direct_oracle() {
    let (m, n, k, howmany) = (20usize, 5, 56, 101);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut a = Tensor3::new([m, k, howmany], [1, m, m * k]);
    let mut b = Tensor3::new([k, n, howmany], [1, k, k * n]);
    let mut c = Tensor3::new([m, n, howmany], [1, m, m * n]);
    a.fill_random(&mut rng);
    b.fill_random(&mut rng);

    small_gemm_batched_ref(Transpose::N, Transpose::N, 1.0, &a, &b, 0.0, &mut c);

    let eps = 10.0 * f32::EPSILON * k as f32;
    for j in [0usize, 50, 100] {
        for nn in 0..n {
            for mm in 0..m {
                let mut want = 0.0f32;
                for kk in 0..k {
                    want += a.at(mm, kk, j) * b.at(kk, nn, j);
                }
                assert!(
                    (c.at(mm, nn, j) - want).abs() <= eps.max(10.0 * f32::EPSILON),
                    "mismatch at ({mm}, {nn}, {j})"
                );
            }
        }
    }
}

#[test]
fn reference_handles_transposes_and_beta() {
    let (m, n, k, howmany) = (4usize, 3, 5, 2);
    let mut rng = StdRng::seed_from_u64(7);
    let mut a = Tensor3::new([k, m, howmany], [1, k, k * m]);
    let mut b = Tensor3::new([n, k, howmany], [1, n, n * k]);
    let mut c = Tensor3::new([m, n, howmany], [1, m, m * n]);
    a.fill_random(&mut rng);
    b.fill_random(&mut rng);
    c.fill_random(&mut rng);
    let c0 = Tensor3 {
        shape: c.shape,
        stride: c.stride,
        data: c.data.clone(),
    };

    small_gemm_batched_ref(Transpose::T, Transpose::T, 2.0, &a, &b, 0.5, &mut c);

    for j in 0..howmany {
        for nn in 0..n {
            for mm in 0..m {
                let mut acc = 0.0f32;
                for kk in 0..k {
                    acc += a.at(kk, mm, j) * b.at(nn, kk, j);
                }
                let want = 2.0 * acc + 0.5 * c0.at(mm, nn, j);
                assert!((c.at(mm, nn, j) - want).abs() <= 10.0 * f32::EPSILON * k as f32);
            }
        }
    }
}

fn pvc() -> CoreInfo {
    CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc)
}

fn make_recipe() -> SmallGemmBatched {
    let (m, n, k) = (20, 5, 56);
    SmallGemmBatched::new(
        &pvc(),
        ScalarType::F32,
        Transpose::N,
        Transpose::N,
        m,
        n,
        k,
        m,
        m * k,
        k,
        k * n,
        m,
        m * n,
    )
    .unwrap()
}

#[test]
fn recipe_produces_a_complete_kernel() {
    let recipe = make_recipe();
    let handler = recipe.handler();
    let md = handler.metadata();
    let src = &handler.artifact().source;

    assert!(src.contains(&format!("kernel void {}(", handler.kernel_name())));
    assert!(src.contains("reqd_work_group_size"));
    // Batch extents arrive as dynamic shape parameters.
    assert!(src.contains("arg1_shape2"));
    assert!(src.contains("arg2_shape2"));
    assert!(src.contains("arg4_shape2"));
    assert!(src.contains("get_group_id(2)"));

    assert_eq!(md.work_group_size[0] % md.subgroup_size, 0);
    let cfg = pvc().get_core_config(md.subgroup_size).unwrap();
    assert!(md.work_group_size[0] * md.work_group_size[1] <= cfg.max_number_of_work_items);
}

#[test]
fn compilation_is_deterministic() {
    use pretty_assertions::assert_eq;

    let a = make_recipe();
    let b = make_recipe();
    assert_eq!(a.handler().artifact().source, b.handler().artifact().source);
    assert_eq!(
        a.handler().artifact().extensions,
        b.handler().artifact().extensions
    );
}

#[derive(Default)]
struct RecordingCommandList {
    launches: Vec<(String, Vec<ArgValue>, [u32; 3], [u64; 3])>,
}

impl CommandList for RecordingCommandList {
    fn enqueue(&mut self, launch: &KernelLaunch<'_>) -> Event {
        self.launches.push((
            launch.kernel.to_string(),
            launch.args.to_vec(),
            launch.local_size,
            launch.global_size,
        ));
        Event(self.launches.len() as u64)
    }
}

#[test]
fn recipe_binds_and_submits_arguments() {
    let mut recipe = make_recipe();
    let howmany = 101i64;
    recipe.set_args(
        howmany,
        ArgValue::F32(1.0),
        DeviceMem(0x1000),
        DeviceMem(0x2000),
        ArgValue::F32(0.0),
        DeviceMem(0x3000),
    );
    let mut cmd = RecordingCommandList::default();
    let event = recipe.submit(&mut cmd, &[]).unwrap();
    assert_eq!(event, Event(1));

    let (kernel, args, local, global) = &cmd.launches[0];
    assert_eq!(kernel, recipe.handler().kernel_name());
    assert_eq!(
        args.as_slice(),
        &[
            ArgValue::F32(1.0),
            ArgValue::Mem(DeviceMem(0x1000)),
            ArgValue::I64(howmany),
            ArgValue::Mem(DeviceMem(0x2000)),
            ArgValue::I64(howmany),
            ArgValue::F32(0.0),
            ArgValue::Mem(DeviceMem(0x3000)),
            ArgValue::I64(howmany),
        ]
    );
    let md = recipe.handler().metadata();
    assert_eq!(*local, [md.work_group_size[0], md.work_group_size[1], 1]);
    assert_eq!(
        *global,
        [
            md.work_group_size[0] as u64,
            md.work_group_size[1] as u64,
            howmany as u64
        ]
    );
}

#[test]
fn submit_without_args_is_rejected() {
    let recipe = make_recipe();
    let mut cmd = RecordingCommandList::default();
    assert!(recipe.submit(&mut cmd, &[]).is_err());
}

struct FakeCompiler {
    expect_option: &'static str,
}

impl DeviceCompiler for FakeCompiler {
    fn compile(
        &self,
        source: &str,
        _format: BundleFormat,
        _ip_version: u32,
        options: &[String],
        extensions: &[String],
    ) -> Result<Vec<u8>, String> {
        assert!(options.iter().any(|o| o == "-cl-std=CL2.0"));
        assert!(options.iter().any(|o| o == "-cl-mad-enable"));
        assert!(options.iter().any(|o| o == self.expect_option));
        assert!(extensions.iter().any(|e| e == "cl_khr_fp64"));
        Ok(source.as_bytes().to_vec())
    }
}

#[test]
fn binary_carries_metadata_and_features() {
    let mut pb = ProgramBuilder::new();
    let f32_ty = pb.ctx().f32();
    let a_ty = pb
        .ctx()
        .get_memref(f32_ty, &[32, 32], &packed_strides(&[32, 32]), AddressSpace::Global)
        .unwrap();
    pb.create_function("scale", &[f32_ty, a_ty], |fb| {
        let loc = Location::default;
        let p = fb.params();
        let f32_ty = fb.ctx().f32();
        let beta = fb.constant_zero(f32_ty, loc())?;
        fb.axpby(Transpose::N, p[0], p[1], beta, p[1], loc())?;
        fb.func_mut()
            .set_core_features(CoreFeatureFlags::LARGE_REGISTER_FILE);
        Ok(())
    })
    .unwrap();
    let mut prog = pb.build();

    let backend = FakeCompiler {
        expect_option: LARGE_REGISTER_FILE_OPTION_ZE,
    };
    let binary = compile_to_binary(&mut prog, &pvc(), BundleFormat::Spirv, &backend).unwrap();
    assert_eq!(binary.format, BundleFormat::Spirv);
    assert!(!binary.blob.is_empty());
    assert!(binary.core_features.contains(CoreFeatureFlags::LARGE_REGISTER_FILE));
    let md = &binary.metadata["scale"];
    assert!(md.subgroup_size > 0);
    assert!(md.work_group_size[0] > 0 && md.work_group_size[1] > 0);
}
