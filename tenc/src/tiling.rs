//! GEMM register blocking and work-group tiling.
//!
//! [`max_register_block_gemm`] picks the largest register block that fits
//! half the register file, maximizing arithmetic intensity under a K-unroll
//! budget. [`suggest_local_tiling`] doubles work-group tiles alternately
//! until either the dominant BLAS shape is covered or the work-item limit of
//! the core config is reached.

use tenc_ir::{is_dynamic_value, DYNAMIC};

use crate::device::{CoreConfig, CoreInfo};

/// K-unroll depth assumed by the register blocking model.
pub const MAX_K_UNROLLING: u32 = 8;

/// Shape of a BLAS-shaped instruction: element size and `(M, N)` extents
/// ([`DYNAMIC`] for run-time-known extents).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasShape {
    /// Element size of the accumulated operand in bytes.
    pub element_size: u32,
    /// `(M, N)` extents.
    pub shape: [i64; 2],
}

impl BlasShape {
    /// Shape from element size and extents.
    pub fn new(element_size: u32, m: i64, n: i64) -> Self {
        Self {
            element_size,
            shape: [m, n],
        }
    }
}

/// Work-group tiling: `m_tiles × n_tiles` subgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTiling {
    /// Subgroup tiles along M.
    pub m_tiles: u32,
    /// Subgroup tiles along N.
    pub n_tiles: u32,
}

impl LocalTiling {
    /// Work items used by this tiling at the given subgroup size.
    pub fn number_of_work_items(&self, subgroup_size: u32) -> u32 {
        self.m_tiles * self.n_tiles * subgroup_size
    }

    /// Work-group size `[m_tiles·sgs, n_tiles]`.
    pub fn work_group_size(&self, subgroup_size: u32) -> [u32; 2] {
        [self.m_tiles * subgroup_size, self.n_tiles]
    }
}

/// Largest `(row_blocks, cols)` register block for a GEMM accumulator.
///
/// The accumulator takes `row_blocks·sgs·cols` scalars; A and B panels take
/// `row_blocks·sgs·ku + cols·ku` scalars for a K-unroll of `ku`. The budget
/// is half of `register_space`. Among the feasible blocks the one with the
/// highest arithmetic intensity wins.
pub fn max_register_block_gemm(
    element_size: u32,
    subgroup_size: u32,
    register_space: u32,
) -> (u32, u32) {
    let sgs = subgroup_size as i64;
    let ku = MAX_K_UNROLLING as i64;
    let max_scalars = (register_space / (2 * element_size)) as i64;

    let arithmetic_intensity = |row_blocks: i64, cols: i64| -> f64 {
        (row_blocks * sgs * cols) as f64 / (row_blocks * sgs + cols) as f64
    };
    let max_row_blocks = |cols: i64| (max_scalars - cols * ku) / (sgs * (cols + ku));
    let max_cols = |row_blocks: i64| (max_scalars - row_blocks * sgs * ku) / (row_blocks * sgs + ku);

    let mut best = (0i64, 0i64);
    let mut best_ai = 0.0f64;
    let mut m = 1;
    while m <= max_row_blocks(1) {
        let n = max_cols(m);
        if n >= 1 {
            let ai = arithmetic_intensity(m, n);
            if ai > best_ai {
                best_ai = ai;
                best = (m, n);
            }
        }
        m += 1;
    }
    (best.0 as u32, best.1 as u32)
}

fn tiles_needed(extent: i64, block: i64) -> u32 {
    if is_dynamic_value(extent) {
        u32::MAX
    } else {
        (1 + (extent - 1) / block.max(1)).min(u32::MAX as i64) as u32
    }
}

/// Suggest the work-group tiling for a set of BLAS shapes.
///
/// Starts at `1×1` and alternately doubles the N and M tile counts (N
/// first). A dimension only doubles while the doubled count still covers
/// distinct blocks of the dominant shape, and the total tile count never
/// exceeds `max_number_of_work_items / subgroup_size`.
pub fn suggest_local_tiling(shapes: &[BlasShape], cfg: &CoreConfig) -> LocalTiling {
    if shapes.is_empty() {
        return LocalTiling {
            m_tiles: 1,
            n_tiles: 1,
        };
    }

    let max_tiles = cfg.max_number_of_work_items / cfg.subgroup_size;

    let extent = |s: &BlasShape, i: usize| {
        if is_dynamic_value(s.shape[i]) {
            i64::MAX
        } else {
            s.shape[i]
        }
    };
    let mut m: i64 = 0;
    let mut n: i64 = 0;
    let mut element_size = 0u32;
    for s in shapes {
        m = m.max(extent(s, 0));
        n = n.max(extent(s, 1));
        element_size = element_size.max(s.element_size);
    }
    let m = if m == i64::MAX { DYNAMIC } else { m };
    let n = if n == i64::MAX { DYNAMIC } else { n };

    let (row_blocks, cols) =
        max_register_block_gemm(element_size, cfg.subgroup_size, cfg.register_space);
    let limit_m = tiles_needed(m, row_blocks as i64 * cfg.subgroup_size as i64);
    let limit_n = tiles_needed(n, cols as i64);

    let mut tiling = LocalTiling {
        m_tiles: 1,
        n_tiles: 1,
    };
    // 0 = M, 1 = N; N gets the first and therefore the odd doubling.
    let mut prefer = 1;
    while 2 * tiling.m_tiles * tiling.n_tiles <= max_tiles {
        let try_double = |t: &mut LocalTiling, dim: usize| -> bool {
            let (cur, limit) = if dim == 0 {
                (t.m_tiles, limit_m)
            } else {
                (t.n_tiles, limit_n)
            };
            if cur.saturating_mul(2) > limit {
                return false;
            }
            if dim == 0 {
                t.m_tiles *= 2;
            } else {
                t.n_tiles *= 2;
            }
            true
        };
        if try_double(&mut tiling, prefer) {
            prefer = 1 - prefer;
        } else if !try_double(&mut tiling, 1 - prefer) {
            break;
        }
    }
    tracing::debug!(
        m_tiles = tiling.m_tiles,
        n_tiles = tiling.n_tiles,
        "local tiling"
    );
    tiling
}

/// Pick a subgroup size for a set of BLAS shapes.
///
/// Small static M extents fit in the smallest subgroup; everything else
/// takes the largest available size.
pub fn suggest_subgroup_size(shapes: &[BlasShape], info: &CoreInfo) -> u32 {
    let sizes = info.subgroup_sizes();
    let smallest = sizes.first().copied().unwrap_or(16);
    let largest = sizes.last().copied().unwrap_or(smallest);
    let mut max_m: i64 = 0;
    for s in shapes {
        if is_dynamic_value(s.shape[0]) {
            return largest;
        }
        max_m = max_m.max(s.shape[0]);
    }
    if max_m != 0 && max_m <= smallest as i64 {
        smallest
    } else {
        largest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IntelGpuArchitecture;
    use rstest::rstest;
    use tenc_ir::CoreFeatureFlags;

    #[rstest]
    #[case(4, 16, 8192, (2, 19))]
    #[case(4, 16, 16384, (2, 44))]
    #[case(4, 32, 8192, (1, 19))]
    #[case(4, 32, 16384, (1, 44))]
    #[case(8, 16, 8192, (1, 16))]
    #[case(8, 16, 16384, (2, 19))]
    fn register_block(
        #[case] element_size: u32,
        #[case] sgs: u32,
        #[case] register_space: u32,
        #[case] expected: (u32, u32),
    ) {
        assert_eq!(
            max_register_block_gemm(element_size, sgs, register_space),
            expected
        );
    }

    fn pvc_lrf() -> CoreInfo {
        let mut info = CoreInfo::intel_gpu(IntelGpuArchitecture::Pvc);
        info.set_core_feature(CoreFeatureFlags::LARGE_REGISTER_FILE);
        info
    }

    #[rstest]
    #[case(1, 1, 16, 1, 1)]
    #[case(16, 32, 16, 1, 2)]
    #[case(84, 56, 32, 2, 2)]
    #[case(128, 128, 32, 4, 4)]
    #[case(256, 128, 32, 8, 4)]
    #[case(256, 256, 32, 4, 8)]
    #[case(512, 512, 32, 4, 8)]
    #[case(16123, 9, 32, 32, 1)]
    #[case(461, 283, 32, 4, 8)]
    #[case(DYNAMIC, DYNAMIC, 16, 4, 8)]
    fn local_tiling(
        #[case] m: i64,
        #[case] n: i64,
        #[case] sgs: u32,
        #[case] m_tiles: u32,
        #[case] n_tiles: u32,
    ) {
        let info = pvc_lrf();
        let cfg = info.get_core_config(sgs).unwrap();
        let tiling = suggest_local_tiling(&[BlasShape::new(8, m, n)], &cfg);
        assert_eq!(tiling.m_tiles, m_tiles);
        assert_eq!(tiling.n_tiles, n_tiles);
        assert!(tiling.number_of_work_items(sgs) <= cfg.max_number_of_work_items);
    }

    #[test]
    fn empty_shapes_use_one_tile() {
        let info = pvc_lrf();
        let cfg = info.get_core_config(16).unwrap();
        assert_eq!(
            suggest_local_tiling(&[], &cfg),
            LocalTiling {
                m_tiles: 1,
                n_tiles: 1
            }
        );
    }
}
