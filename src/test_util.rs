#![cfg(test)]
use crate::AttackFloat;
use ndarray::Array4;
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;

prop_compose! {
    pub fn array4(shape: (usize, usize, usize, usize), low: AttackFloat, high: AttackFloat)(v in Vec::lift1_with(low..high, SizeRange::new(shape.0 * shape.1 * shape.2 * shape.3..=shape.0 * shape.1 * shape.2 * shape.3))) -> Array4<AttackFloat> {
        Array4::from_shape_vec(shape, v).unwrap()
    }
}

prop_compose! {
    /// A clean image in `[0, 1)` and an arbitrary perturbation of the same shape
    pub fn image_and_delta(n: usize, c: usize, h: usize, w: usize)(image in array4((n, c, h, w), 0., 1.), delta in array4((n, c, h, w), -1., 1.)) -> (Array4<AttackFloat>, Array4<AttackFloat>) {
        (image, delta)
    }
}
