use super::{ShapeTransformDescriptor, SubDimension};
use crate::ops::{MultiBroadcast, Operation, Reshape, Transpose};
use crate::shape::invert_permutation;

/// Collects emitted operators and the extents they produce.
struct Emitter {
    ops: Vec<Operation>,
    lens: Vec<usize>,
}

impl Emitter {
    fn reshape(&mut self, lens: Vec<usize>) {
        if lens != self.lens {
            self.ops.push(Operation::new(Reshape::new(lens.iter().copied())));
            self.lens = lens;
        }
    }

    fn transpose(&mut self, permutation: Vec<usize>) {
        if permutation.iter().enumerate().any(|(i, &p)| i != p) {
            self.lens = permutation.iter().map(|&p| self.lens[p]).collect();
            self.ops.push(Operation::new(Transpose::new(permutation)));
        }
    }

    fn multibroadcast(&mut self, lens: Vec<usize>) {
        if lens != self.lens {
            self.ops.push(Operation::new(MultiBroadcast::new(lens.clone())));
            self.lens = lens;
        }
    }
}

/// Carries data from the input: neither introduced nor a broadcast over a hidden axis.
fn is_source(sub: &SubDimension) -> bool {
    !sub.axis.is_empty()
}

/// Extents with broadcast entries set to 1 and leading broadcast entries dropped,
/// ready for a right-aligned `multibroadcast`.
fn pre_broadcast_lens(entries: &[(usize, bool)]) -> Vec<usize> {
    let leading = entries.iter().take_while(|(_, bcast)| *bcast).count();
    entries[leading..]
        .iter()
        .map(|&(len, bcast)| if bcast { 1 } else { len })
        .collect()
}

impl ShapeTransformDescriptor {
    /// Minimal operator sequence reproducing this descriptor from its input:
    /// one reshape to split input axes, one transpose, then the broadcasts and the
    /// reshape into the output dimensions.
    pub fn generate(&self) -> Vec<Operation> {
        let mut emitter = Emitter {
            ops: Vec::new(),
            lens: self.input_lens.clone(),
        };
        let out_lens = self.lens();
        let subs: Vec<&SubDimension> = self
            .dimensions
            .iter()
            .flat_map(|d| d.subdimensions.iter())
            .collect();
        let sources: Vec<&SubDimension> = subs.iter().copied().filter(|s| is_source(s)).collect();

        if sources.is_empty() {
            if !emitter.lens.is_empty() {
                emitter.reshape(vec![1]);
            }
            if !out_lens.is_empty() {
                emitter.multibroadcast(out_lens);
            }
            return emitter.ops;
        }

        let mut order: Vec<usize> = (0..sources.len()).collect();
        order.sort_by(|&a, &b| sources[a].axis.cmp(&sources[b].axis));
        emitter.reshape(order.iter().map(|&i| sources[i].len).collect());
        emitter.transpose(invert_permutation(&order));

        let has_broadcast = subs.iter().any(|s| !is_source(s));
        let separable = self.dimensions.iter().all(|d| {
            d.subdimensions.iter().all(|s| is_source(s)) || d.subdimensions.iter().all(|s| !is_source(s))
        });
        if separable {
            let entries: Vec<(usize, bool)> = self
                .dimensions
                .iter()
                .map(|d| (d.len(), !d.is_empty() && d.subdimensions.iter().all(|s| !is_source(s))))
                .collect();
            emitter.reshape(pre_broadcast_lens(&entries));
            if has_broadcast {
                emitter.multibroadcast(out_lens);
            }
            return emitter.ops;
        }

        let entries: Vec<(usize, bool)> = subs.iter().map(|s| (s.len, !is_source(s))).collect();
        emitter.reshape(pre_broadcast_lens(&entries));
        emitter.multibroadcast(subs.iter().map(|s| s.len).collect());
        emitter.reshape(out_lens);
        emitter.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ops: &[Operation]) -> Vec<String> {
        ops.iter().map(|op| op.to_string()).collect()
    }

    #[test]
    fn identity_generates_nothing() {
        let d = ShapeTransformDescriptor::new(&[2, 3]);
        assert!(d.generate().is_empty());
    }

    #[test]
    fn reshape_then_transpose_becomes_transpose_then_reshape() {
        let mut d = ShapeTransformDescriptor::new(&[2, 3, 4]);
        assert!(d.apply_reshape(&[6, 4]));
        assert!(d.apply_transpose(&[1, 0]));
        d.simplify();
        let ops = d.generate();
        assert_eq!(
            ops,
            vec![
                Operation::new(Transpose::new(vec![2, 0, 1])),
                Operation::new(Reshape::new([4, 6])),
            ],
            "{:?}",
            names(&ops)
        );
    }

    #[test]
    fn leading_broadcast_is_a_single_multibroadcast() {
        let mut d = ShapeTransformDescriptor::new(&[3]);
        assert!(d.apply_multibroadcast(&[2, 3]));
        d.simplify();
        assert_eq!(d.generate(), vec![Operation::new(MultiBroadcast::new(vec![2, 3]))]);
    }
}
