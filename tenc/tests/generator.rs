//! Work-group-size and register-blocking suggestions.

use proptest::prelude::*;
use tenc::{
    max_register_block_gemm, suggest_local_tiling, BlasShape, CoreInfo, IntelGpuArchitecture,
};
use tenc_ir::{CoreFeatureFlags, DYNAMIC};

#[test]
fn suggest_work_group_size() {
    let mut info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
    info.set_core_feature(CoreFeatureFlags::LARGE_REGISTER_FILE);
    assert_eq!(info.register_size(), 64);
    assert_eq!(info.num_registers_per_thread(), 256);

    let check = |m: i64, n: i64, sgs: u32, m_tiles: u32, n_tiles: u32| {
        let core_cfg = info.get_core_config(sgs).unwrap();
        let shape = BlasShape::new(8, m, n);
        let tiling = suggest_local_tiling(&[shape], &core_cfg);
        assert_eq!(tiling.m_tiles, m_tiles, "m tiles for {m}x{n} at sgs {sgs}");
        assert_eq!(tiling.n_tiles, n_tiles, "n tiles for {m}x{n} at sgs {sgs}");
        assert!(tiling.number_of_work_items(sgs) <= core_cfg.max_number_of_work_items);
    };

    check(1, 1, 16, 1, 1);
    check(16, 32, 16, 1, 2);
    check(84, 56, 32, 2, 2);
    check(128, 128, 32, 4, 4);
    check(256, 128, 32, 8, 4);
    check(256, 256, 32, 4, 8);
    check(512, 512, 32, 4, 8);
    check(16123, 9, 32, 32, 1);
    check(461, 283, 32, 4, 8);
    check(DYNAMIC, DYNAMIC, 16, 4, 8);
}

#[test]
fn max_register_block() {
    assert_eq!(max_register_block_gemm(4, 16, 8192), (2, 19));
    assert_eq!(max_register_block_gemm(4, 16, 16384), (2, 44));
    assert_eq!(max_register_block_gemm(4, 32, 8192), (1, 19));
    assert_eq!(max_register_block_gemm(4, 32, 16384), (1, 44));
    assert_eq!(max_register_block_gemm(8, 16, 8192), (1, 16));
    assert_eq!(max_register_block_gemm(8, 16, 16384), (2, 19));
}

#[test]
fn local_tiling_without_large_grf() {
    let info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
    let cfg = info.get_core_config(32).unwrap();
    let tiling = suggest_local_tiling(&[BlasShape::new(8, 256, 256)], &cfg);
    assert_eq!((tiling.m_tiles, tiling.n_tiles), (4, 8));
    assert!(tiling.number_of_work_items(32) <= cfg.max_number_of_work_items);
}

proptest! {
    #[test]
    fn tiling_never_exceeds_the_work_item_budget(
        m in 1i64..20_000,
        n in 1i64..20_000,
        elem in prop_oneof![Just(4u32), Just(8u32)],
        lrf in any::<bool>(),
        sgs in prop_oneof![Just(16u32), Just(32u32)],
    ) {
        let mut info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        if lrf {
            info.set_core_feature(CoreFeatureFlags::LARGE_REGISTER_FILE);
        }
        let cfg = info.get_core_config(sgs).unwrap();
        let tiling = suggest_local_tiling(&[BlasShape::new(elem, m, n)], &cfg);
        prop_assert!(tiling.m_tiles >= 1 && tiling.n_tiles >= 1);
        prop_assert!(tiling.number_of_work_items(sgs) <= cfg.max_number_of_work_items);
    }
}
