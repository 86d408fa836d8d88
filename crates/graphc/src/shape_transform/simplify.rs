use std::collections::{BTreeMap, BTreeSet};

use super::{ShapeTransformDescriptor, SubDimension};

const MAX_ROUNDS: usize = 32;

impl ShapeTransformDescriptor {
    /// Normalizes the representation. Running it twice changes nothing.
    pub fn simplify(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let before = self.clone();
            self.remove_unit_subdimensions();
            self.renumber_splits();
            self.merge_splits();
            self.renumber_splits();
            self.elide_scalar_axis();
            self.reinsert_missing_axes();
            if *self == before {
                break;
            }
        }
    }

    /// Drops size-1 sub-dimensions from dimensions that have other sub-dimensions.
    fn remove_unit_subdimensions(&mut self) {
        for dim in &mut self.dimensions {
            if dim.subdimensions.len() < 2 {
                continue;
            }
            let first = dim.subdimensions[0].clone();
            dim.subdimensions.retain(|s| s.len != 1);
            if dim.subdimensions.is_empty() {
                dim.subdimensions.push(first);
            }
        }
    }

    /// Rewrites split paths of each input axis to `[a, 0..n]`, keeping their order;
    /// a lone piece becomes `[a]` again.
    fn renumber_splits(&mut self) {
        let mut pieces: BTreeMap<usize, BTreeSet<Vec<usize>>> = BTreeMap::new();
        let all_paths = self.dimensions.iter().flat_map(|d| {
            d.subdimensions
                .iter()
                .flat_map(|s| std::iter::once(&s.axis).chain(s.hidden_axis.iter()))
        });
        for path in all_paths {
            if path.len() >= 2 {
                pieces.entry(path[0]).or_default().insert(path.clone());
            }
        }
        let mut renames: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
        for (axis, paths) in pieces {
            if paths.len() == 1 {
                for path in paths {
                    renames.insert(path, vec![axis]);
                }
                continue;
            }
            for (k, path) in paths.into_iter().enumerate() {
                renames.insert(path, vec![axis, k]);
            }
        }
        if renames.is_empty() {
            return;
        }
        for sub in self.dimensions.iter_mut().flat_map(|d| d.subdimensions.iter_mut()) {
            if let Some(renamed) = renames.get(&sub.axis) {
                sub.axis = renamed.clone();
            }
            if let Some(hidden) = sub.hidden_axis.as_mut() {
                if let Some(renamed) = renames.get(hidden) {
                    *hidden = renamed.clone();
                }
            }
        }
    }

    /// Merges neighbouring pieces `[.., k]` and `[.., k + 1]` of the same axis.
    fn merge_splits(&mut self) {
        for dim in &mut self.dimensions {
            let mut merged: Vec<SubDimension> = Vec::with_capacity(dim.subdimensions.len());
            for sub in dim.subdimensions.drain(..) {
                if let Some(prev) = merged.last_mut() {
                    if are_consecutive_pieces(prev, &sub) {
                        prev.len *= sub.len;
                        continue;
                    }
                }
                merged.push(sub);
            }
            dim.subdimensions = merged;
        }
    }

    /// An input of a single size-1 axis carries no layout; forget its origin.
    fn elide_scalar_axis(&mut self) {
        if self.input_lens != [1] {
            return;
        }
        for sub in self.dimensions.iter_mut().flat_map(|d| d.subdimensions.iter_mut()) {
            if sub.origin() == Some(0) {
                sub.axis.clear();
                sub.hidden_axis = None;
            }
        }
    }

    /// Puts back size-1 input axes that no sub-dimension refers to any more.
    ///
    /// A broadcast sub-dimension between the neighbouring axes absorbs the axis as
    /// its hidden origin when one exists; otherwise a `1` is placed right after the
    /// previous present axis (or before the next one), so no transpose is needed.
    fn reinsert_missing_axes(&mut self) {
        if self.input_lens == [1] || self.dimensions.is_empty() {
            return;
        }
        for axis in 0..self.rank() {
            let positions = self.flat_positions();
            if positions.iter().any(|&(_, _, origin)| origin == Some(axis)) {
                continue;
            }
            let prev = positions
                .iter()
                .rposition(|&(_, _, origin)| origin.is_some_and(|o| o < axis));
            let next = positions
                .iter()
                .position(|&(_, _, origin)| origin.is_some_and(|o| o > axis));
            let lower = prev.map_or(0, |p| p + 1);
            let upper = next.unwrap_or(positions.len());
            let slot = (lower..upper).find(|&i| {
                let (d, s, _) = positions[i];
                let sub = &self.dimensions[d].subdimensions[s];
                sub.is_broadcast() && sub.hidden_axis.is_none() && sub.len > 1
            });
            if let Some(i) = slot {
                let (d, s, _) = positions[i];
                self.dimensions[d].subdimensions[s].hidden_axis = Some(vec![axis]);
                continue;
            }
            let unit = SubDimension::new(1, vec![axis]);
            match (prev, next) {
                (Some(p), _) => {
                    let (d, s, _) = positions[p];
                    self.dimensions[d].subdimensions.insert(s + 1, unit);
                }
                (None, Some(n)) => {
                    let (d, s, _) = positions[n];
                    self.dimensions[d].subdimensions.insert(s, unit);
                }
                (None, None) => self.dimensions[0].subdimensions.insert(0, unit),
            }
        }
    }

    /// `(dimension, sub-dimension, origin)` for every sub-dimension in order.
    fn flat_positions(&self) -> Vec<(usize, usize, Option<usize>)> {
        self.dimensions
            .iter()
            .enumerate()
            .flat_map(|(d, dim)| {
                dim.subdimensions
                    .iter()
                    .enumerate()
                    .map(move |(s, sub)| (d, s, sub.origin()))
            })
            .collect()
    }
}

fn are_consecutive_pieces(a: &SubDimension, b: &SubDimension) -> bool {
    let n = a.axis.len();
    n >= 2
        && b.axis.len() == n
        && a.hidden_axis.is_none()
        && b.hidden_axis.is_none()
        && a.axis[..n - 1] == b.axis[..n - 1]
        && a.axis[n - 1] + 1 == b.axis[n - 1]
}
