//! Conversion of caller data into instance arrays.
//!
//! Every equation is paired with an array holding one measurement per instance. The
//! `IntoInstanceArray` trait lets callers hand over whatever array type they already have:
//! plain `Vec<f64>` and slices, ndarray arrays of any dimension, or nalgebra vectors. A bare
//! `f64` becomes a 0-d array that broadcasts over all instances.

use nalgebra::DVector;
use ndarray::{arr0, Array1, Array2, ArrayD};

/// A trait for array-like types that can carry the instance axis of an equation.
///
/// # Examples
///
/// ```rust
/// use linsolve::data::IntoInstanceArray;
///
/// let array = vec![1.0, 2.0, 3.0].into_instance_array();
/// assert_eq!(array.shape(), &[3]);
///
/// let scalar = 5.0_f64.into_instance_array();
/// assert_eq!(scalar.ndim(), 0);
/// ```
pub trait IntoInstanceArray {
    /// Converts the value into an n-dimensional array whose shape is the instance shape.
    fn into_instance_array(self) -> ArrayD<f64>;
}

impl IntoInstanceArray for f64 {
    fn into_instance_array(self) -> ArrayD<f64> {
        arr0(self).into_dyn()
    }
}

impl IntoInstanceArray for Vec<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        Array1::from_vec(self).into_dyn()
    }
}

impl IntoInstanceArray for &[f64] {
    fn into_instance_array(self) -> ArrayD<f64> {
        Array1::from_vec(self.to_vec()).into_dyn()
    }
}

impl<const N: usize> IntoInstanceArray for [f64; N] {
    fn into_instance_array(self) -> ArrayD<f64> {
        Array1::from_vec(self.to_vec()).into_dyn()
    }
}

impl IntoInstanceArray for Array1<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        self.into_dyn()
    }
}

impl IntoInstanceArray for Array2<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        self.into_dyn()
    }
}

impl IntoInstanceArray for ArrayD<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        self
    }
}

impl IntoInstanceArray for &ArrayD<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        self.clone()
    }
}

impl IntoInstanceArray for DVector<f64> {
    fn into_instance_array(self) -> ArrayD<f64> {
        Array1::from_vec(self.as_slice().to_vec()).into_dyn()
    }
}

/// Collects `(equation, data)` pairs into owned instance arrays.
pub(crate) fn collect_pairs<I, S, A>(pairs: I) -> Vec<(String, ArrayD<f64>)>
where
    I: IntoIterator<Item = (S, A)>,
    S: Into<String>,
    A: IntoInstanceArray,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into_instance_array()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_all_backends() {
        let expected = vec![1.0, 2.0];

        let from_vec = vec![1.0, 2.0].into_instance_array();
        let from_slice = [1.0, 2.0][..].into_instance_array();
        let from_array = [1.0, 2.0].into_instance_array();
        let from_ndarray = array![1.0, 2.0].into_instance_array();
        let from_nalgebra = DVector::from_vec(vec![1.0, 2.0]).into_instance_array();

        for array in [from_vec, from_slice, from_array, from_ndarray, from_nalgebra] {
            assert_eq!(array.shape(), &[2]);
            assert_eq!(array.iter().copied().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn test_multidimensional_shape_preserved() {
        let array = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_instance_array();
        assert_eq!(array.shape(), &[2, 3]);
    }

    #[test]
    fn test_scalar_is_zero_dimensional() {
        let array = 3.5_f64.into_instance_array();
        assert_eq!(array.ndim(), 0);
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn test_collect_pairs() {
        let pairs = collect_pairs(vec![("g1 + g2", vec![1.0]), ("g1 - g2", vec![2.0])]);
        assert_eq!(pairs[0].0, "g1 + g2");
        assert_eq!(pairs[1].1.shape(), &[1]);
    }
}
