//! The pass pipeline.
//!
//! Runs verification and the transformation passes over a whole program in
//! a fixed order: type/entity verification, per-graph node verification,
//! doubleword lowering, loop unrolling. Verification failures stop the
//! pipeline; transformation passes record their work in the returned
//! statistics.

use log::{debug, info};

use crate::core::error::{PassError, PassResult};
use crate::ir::verify::irg_verify;
use crate::lower::{lower_dw_ops, IntrinsicFactory, LowerDwParams};
use crate::opt::unroll::{unroll_loops, UnrollParams};
use crate::types::{tr_verify, Program};

/// What to run and with which parameters.
pub struct PipelineConfig {
    pub verify_types: bool,
    pub verify_graphs: bool,
    pub lower_dw: Option<LowerDwParams>,
    pub unroll: Option<UnrollParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            verify_types: true,
            verify_graphs: true,
            lower_dw: None,
            unroll: None,
        }
    }
}

/// Counters reported by one pipeline run.
#[derive(Default, Debug, Clone, Copy)]
pub struct PipelineStats {
    pub graphs_lowered: usize,
    pub loops_unrolled: u32,
}

/// Run the configured passes over the program.
pub fn run_pipeline(
    program: &mut Program,
    config: &PipelineConfig,
    factory: &mut dyn IntrinsicFactory,
) -> PassResult<PipelineStats> {
    let mut stats = PipelineStats::default();

    if config.verify_types && !tr_verify(program) {
        return Err(PassError::VerificationFailed);
    }
    if config.verify_graphs {
        for gid in program.graph_ids() {
            if !irg_verify(program.graph_mut(gid)) {
                return Err(PassError::GraphVerificationFailed { graph: gid.idx() });
            }
        }
    }

    if let Some(params) = &config.lower_dw {
        debug!("pipeline: lowering doubleword operations");
        lower_dw_ops(program, params, factory);
        stats.graphs_lowered = program.graph_ids().len();
    }

    if let Some(params) = &config.unroll {
        for gid in program.graph_ids() {
            stats.loops_unrolled += unroll_loops(program, gid, params.factor, params.maxsize);
        }
        debug!("pipeline: {} loops unrolled", stats.loops_unrolled);
    }

    info!(
        "pipeline finished: {} graphs lowered, {} loops unrolled",
        stats.graphs_lowered, stats.loops_unrolled
    );
    Ok(stats)
}
