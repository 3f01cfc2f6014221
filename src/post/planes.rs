//! Alternative solutions carried from one stage to the next.
//!
//! A double couple fits the data equally well on either nodal plane, and the
//! frequency-domain stage 1 cannot tell the slip direction apart either, so
//! the best stage-1 solution fans out into four candidates:
//!
//! ```text
//! best, auxiliary plane, best with reversed slip, auxiliary with reversed slip
//! ```
//!
//! Stage 2 keeps the two planes only. All of them inherit the best misfit.

use crate::domain::{Rupture, SolutionRecord, SourceModel, Stage};
use crate::math::mechanism;

pub fn auxiliary_candidates(best: &SolutionRecord) -> Vec<SolutionRecord> {
    match best.model {
        SourceModel::MomentTensor(mt) => {
            let mut out = vec![*best];
            if best.base.stage == Stage::PointSource {
                let mut negated = *best;
                if let SourceModel::MomentTensor(t) = &mut negated.model {
                    t.components = mt.components.map(|c| -c);
                }
                out.push(negated);
            }
            out
        }
        SourceModel::DoubleCouple(m) | SourceModel::KinematicRupture(Rupture { mechanism: m, .. }) => {
            let aux = mechanism::auxiliary_plane(m);
            let planes = if best.base.stage == Stage::PointSource {
                vec![m, aux, m.flipped_rake(), aux.flipped_rake()]
            } else {
                vec![m, aux]
            };
            planes
                .into_iter()
                .map(|plane| {
                    let mut r = *best;
                    if let Some(slot) = r.mechanism_mut() {
                        *slot = plane;
                    }
                    r.normalized()
                })
                .collect()
        }
    }
}
