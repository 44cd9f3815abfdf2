//! Common data types for NextStat expectation values

use std::fmt;
use std::ops::{Add, Div, Index, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A scalar, an n-dimensional array (row-major), or an ordered collection of
/// named scalars/arrays.
///
/// User functions return `Shaped<f64>`; expectation results come back as
/// `Shaped<Uncertain>` with the same layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shaped<T> {
    /// Single value.
    Scalar(T),
    /// Row-major array with explicit shape.
    Array {
        /// Array dimensions.
        shape: Vec<usize>,
        /// Row-major data, `len == shape.iter().product()`.
        data: Vec<T>,
    },
    /// Named entries, kept in insertion order.
    Named(Vec<(String, Shaped<T>)>),
}

/// Output of a user function.
pub type Output = Shaped<f64>;

impl<T> Shaped<T> {
    /// Array with the given shape. Fails if `data.len()` does not match.
    pub fn array(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if n != data.len() {
            return Err(Error::Validation(format!(
                "array shape {:?} needs {} values, got {}",
                shape,
                n,
                data.len()
            )));
        }
        Ok(Shaped::Array { shape, data })
    }

    /// One-dimensional array.
    pub fn vector(data: Vec<T>) -> Self {
        Shaped::Array { shape: vec![data.len()], data }
    }

    /// Named collection from `(name, value)` pairs.
    pub fn named<K: Into<String>>(entries: impl IntoIterator<Item = (K, Shaped<T>)>) -> Self {
        Shaped::Named(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The value if this is a scalar.
    pub fn as_scalar(&self) -> Option<&T> {
        match self {
            Shaped::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Row-major data if this is an array.
    pub fn as_slice(&self) -> Option<&[T]> {
        match self {
            Shaped::Array { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Named entry lookup.
    pub fn get(&self, name: &str) -> Option<&Shaped<T>> {
        match self {
            Shaped::Named(entries) => entries.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Entry names of a named collection (empty otherwise).
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Shaped::Named(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Array shape; `Some(&[])` for scalars and `None` for named collections.
    pub fn shape(&self) -> Option<&[usize]> {
        match self {
            Shaped::Scalar(_) => Some(&[]),
            Shaped::Array { shape, .. } => Some(shape),
            Shaped::Named(_) => None,
        }
    }

    /// Total number of values once flattened.
    pub fn flat_len(&self) -> usize {
        match self {
            Shaped::Scalar(_) => 1,
            Shaped::Array { data, .. } => data.len(),
            Shaped::Named(entries) => entries.iter().map(|(_, v)| v.flat_len()).sum(),
        }
    }

    /// References to all values in flattening order.
    pub fn flat_values(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.flat_len());
        self.collect_flat(&mut out);
        out
    }

    fn collect_flat<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Shaped::Scalar(v) => out.push(v),
            Shaped::Array { data, .. } => out.extend(data.iter()),
            Shaped::Named(entries) => {
                for (_, v) in entries {
                    v.collect_flat(out);
                }
            }
        }
    }

    /// Apply `f` to every value, keeping the layout.
    pub fn map<U>(&self, f: &impl Fn(&T) -> U) -> Shaped<U> {
        match self {
            Shaped::Scalar(v) => Shaped::Scalar(f(v)),
            Shaped::Array { shape, data } => {
                Shaped::Array { shape: shape.clone(), data: data.iter().map(f).collect() }
            }
            Shaped::Named(entries) => {
                Shaped::Named(entries.iter().map(|(k, v)| (k.clone(), v.map(f))).collect())
            }
        }
    }
}

impl From<f64> for Shaped<f64> {
    fn from(v: f64) -> Self {
        Shaped::Scalar(v)
    }
}

impl From<Vec<f64>> for Shaped<f64> {
    fn from(v: Vec<f64>) -> Self {
        Shaped::vector(v)
    }
}

impl<const N: usize> From<[f64; N]> for Shaped<f64> {
    fn from(v: [f64; N]) -> Self {
        Shaped::vector(v.to_vec())
    }
}

impl<T> Index<&str> for Shaped<T> {
    type Output = Shaped<T>;

    fn index(&self, name: &str) -> &Shaped<T> {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no entry named '{name}'"),
        }
    }
}

impl<T> Index<usize> for Shaped<T> {
    type Output = T;

    /// Row-major flat index into an array (index 0 of a scalar is the scalar).
    fn index(&self, i: usize) -> &T {
        match self {
            Shaped::Scalar(v) if i == 0 => v,
            Shaped::Array { data, .. } => &data[i],
            _ => panic!("index {i} out of range for shaped value"),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Shaped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shaped::Scalar(v) => write!(f, "{v}"),
            Shaped::Array { data, .. } => {
                write!(f, "[")?;
                for (i, v) in data.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Shaped::Named(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{k}': {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Data-free layout of a [`Shaped`] value.
///
/// Named entries carry their array shape; an empty shape marks a scalar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeDescriptor {
    /// Single value.
    Scalar,
    /// Row-major array.
    Array(Vec<usize>),
    /// Named scalar/array entries in order.
    Named(Vec<(String, Vec<usize>)>),
}

impl ShapeDescriptor {
    /// Layout of `value`. Nested named collections are rejected.
    pub fn of<T>(value: &Shaped<T>) -> Result<Self> {
        match value {
            Shaped::Scalar(_) => Ok(ShapeDescriptor::Scalar),
            Shaped::Array { shape, .. } => Ok(ShapeDescriptor::Array(shape.clone())),
            Shaped::Named(entries) => {
                let mut layout = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let shape = match v {
                        Shaped::Scalar(_) => Vec::new(),
                        Shaped::Array { shape, .. } => shape.clone(),
                        Shaped::Named(_) => {
                            return Err(Error::Validation(format!(
                                "named entry '{k}' is itself a named collection; only scalars and arrays are supported"
                            )));
                        }
                    };
                    if layout.iter().any(|(name, _): &(String, Vec<usize>)| name == k) {
                        return Err(Error::Validation(format!("duplicate named entry '{k}'")));
                    }
                    layout.push((k.clone(), shape));
                }
                Ok(ShapeDescriptor::Named(layout))
            }
        }
    }

    /// Number of flat slots.
    pub fn size(&self) -> usize {
        match self {
            ShapeDescriptor::Scalar => 1,
            ShapeDescriptor::Array(shape) => shape.iter().product(),
            ShapeDescriptor::Named(entries) => {
                entries.iter().map(|(_, s)| s.iter().product::<usize>()).sum()
            }
        }
    }

    /// Flat slot range and shape of a named entry.
    pub fn entry(&self, name: &str) -> Option<(std::ops::Range<usize>, &[usize])> {
        let ShapeDescriptor::Named(entries) = self else {
            return None;
        };
        let mut start = 0;
        for (k, shape) in entries {
            let n: usize = shape.iter().product();
            if k == name {
                return Some((start..start + n, shape));
            }
            start += n;
        }
        None
    }

    /// Copy `value` into `out` (which must hold exactly [`Self::size`] slots).
    ///
    /// Fails if `value` does not have this layout.
    pub fn flatten_into(&self, value: &Output, out: &mut [f64]) -> Result<()> {
        if out.len() != self.size() {
            return Err(Error::Validation(format!(
                "flat buffer has {} slots, layout needs {}",
                out.len(),
                self.size()
            )));
        }
        match (self, value) {
            (ShapeDescriptor::Scalar, Shaped::Scalar(v)) => {
                out[0] = *v;
                Ok(())
            }
            (ShapeDescriptor::Array(shape), Shaped::Array { shape: s, data })
                if shape == s && data.len() == out.len() =>
            {
                out.copy_from_slice(data);
                Ok(())
            }
            (ShapeDescriptor::Named(layout), Shaped::Named(entries))
                if layout.len() == entries.len() =>
            {
                let mut start = 0;
                for ((name, shape), (k, v)) in layout.iter().zip(entries) {
                    if name != k {
                        return Err(self.mismatch(value));
                    }
                    let n: usize = shape.iter().product();
                    match v {
                        Shaped::Scalar(x) if shape.is_empty() => out[start] = *x,
                        Shaped::Array { shape: s, data } if s == shape && data.len() == n => {
                            out[start..start + n].copy_from_slice(data)
                        }
                        _ => return Err(self.mismatch(value)),
                    }
                    start += n;
                }
                Ok(())
            }
            _ => Err(self.mismatch(value)),
        }
    }

    fn mismatch(&self, value: &Output) -> Error {
        let got = ShapeDescriptor::of(value)
            .map(|d| format!("{d:?}"))
            .unwrap_or_else(|_| "nested named collection".to_string());
        Error::Validation(format!("output layout changed: expected {self:?}, got {got}"))
    }

    /// Rebuild a shaped value from flat values in slot order.
    pub fn restore<T>(&self, flat: Vec<T>) -> Result<Shaped<T>> {
        if flat.len() != self.size() {
            return Err(Error::Validation(format!(
                "cannot restore {:?} from {} values",
                self,
                flat.len()
            )));
        }
        let mut it = flat.into_iter();
        Ok(match self {
            ShapeDescriptor::Scalar => Shaped::Scalar(next_slot(&mut it)?),
            ShapeDescriptor::Array(shape) => {
                Shaped::Array { shape: shape.clone(), data: it.collect() }
            }
            ShapeDescriptor::Named(layout) => {
                let mut entries = Vec::with_capacity(layout.len());
                for (name, shape) in layout {
                    let v = if shape.is_empty() {
                        Shaped::Scalar(next_slot(&mut it)?)
                    } else {
                        let n: usize = shape.iter().product();
                        Shaped::Array { shape: shape.clone(), data: it.by_ref().take(n).collect() }
                    };
                    entries.push((name.clone(), v));
                }
                Shaped::Named(entries)
            }
        })
    }
}

fn next_slot<T>(it: &mut impl Iterator<Item = T>) -> Result<T> {
    it.next().ok_or_else(|| Error::Validation("flat buffer exhausted while restoring".into()))
}

/// Scalar estimate `mean ± sdev`.
///
/// Arithmetic propagates errors to first order assuming the operands are
/// uncorrelated. Correlated quantities (e.g. two moments from one integration)
/// should be combined through the covariance matrix of the producing result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Uncertain {
    /// Central value.
    pub mean: f64,
    /// Standard deviation.
    pub sdev: f64,
}

impl Uncertain {
    /// Create an estimate.
    pub fn new(mean: f64, sdev: f64) -> Self {
        Self { mean, sdev: sdev.abs() }
    }

    /// Exact value (zero uncertainty).
    pub fn exact(mean: f64) -> Self {
        Self { mean, sdev: 0.0 }
    }

    /// Variance `sdev^2`.
    pub fn var(&self) -> f64 {
        self.sdev * self.sdev
    }

    /// Square root with propagated error.
    pub fn sqrt(self) -> Self {
        let m = self.mean.sqrt();
        Self::new(m, 0.5 * self.sdev / m)
    }

    /// `|mean - target| / sdev`; infinite when `sdev == 0` and the values differ.
    pub fn pull(&self, target: f64) -> f64 {
        let d = (self.mean - target).abs();
        if self.sdev > 0.0 {
            d / self.sdev
        } else if d == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

impl Add for Uncertain {
    type Output = Uncertain;
    fn add(self, rhs: Uncertain) -> Uncertain {
        Uncertain::new(self.mean + rhs.mean, self.sdev.hypot(rhs.sdev))
    }
}

impl Sub for Uncertain {
    type Output = Uncertain;
    fn sub(self, rhs: Uncertain) -> Uncertain {
        Uncertain::new(self.mean - rhs.mean, self.sdev.hypot(rhs.sdev))
    }
}

impl Mul for Uncertain {
    type Output = Uncertain;
    fn mul(self, rhs: Uncertain) -> Uncertain {
        let mean = self.mean * rhs.mean;
        Uncertain::new(mean, (rhs.mean * self.sdev).hypot(self.mean * rhs.sdev))
    }
}

impl Div for Uncertain {
    type Output = Uncertain;
    fn div(self, rhs: Uncertain) -> Uncertain {
        let mean = self.mean / rhs.mean;
        Uncertain::new(mean, (self.sdev / rhs.mean).hypot(mean * rhs.sdev / rhs.mean))
    }
}

impl Neg for Uncertain {
    type Output = Uncertain;
    fn neg(self) -> Uncertain {
        Uncertain::new(-self.mean, self.sdev)
    }
}

impl Add<f64> for Uncertain {
    type Output = Uncertain;
    fn add(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.mean + rhs, self.sdev)
    }
}

impl Sub<f64> for Uncertain {
    type Output = Uncertain;
    fn sub(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.mean - rhs, self.sdev)
    }
}

impl Mul<f64> for Uncertain {
    type Output = Uncertain;
    fn mul(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.mean * rhs, self.sdev * rhs)
    }
}

impl Div<f64> for Uncertain {
    type Output = Uncertain;
    fn div(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.mean / rhs, self.sdev / rhs)
    }
}

impl fmt::Display for Uncertain {
    /// Compact notation with two significant digits on the error: `1.904(17)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.sdev.is_finite() || !self.mean.is_finite() || self.sdev == 0.0 {
            return write!(f, "{}({})", self.mean, self.sdev);
        }
        let decimals = (1 - self.sdev.log10().floor() as i32).max(0) as usize;
        let err_digits = (self.sdev * 10f64.powi(decimals as i32)).round() as u64;
        write!(f, "{:.*}({})", decimals, self.mean, err_digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_output() -> Output {
        Shaped::named([("a", Shaped::Scalar(1.0)), ("b", Shaped::vector(vec![2.0, 3.0]))])
    }

    #[test]
    fn test_descriptor_sizes() {
        assert_eq!(ShapeDescriptor::of(&Shaped::Scalar(1.0)).unwrap().size(), 1);
        let arr = Shaped::array(vec![2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(ShapeDescriptor::of(&arr).unwrap(), ShapeDescriptor::Array(vec![2, 3]));
        let d = ShapeDescriptor::of(&named_output()).unwrap();
        assert_eq!(d.size(), 3);
        assert_eq!(d.entry("b"), Some((1..3, &[2usize][..])));
        assert!(d.entry("c").is_none());
    }

    #[test]
    fn test_flatten_and_restore_named() {
        let v = named_output();
        let d = ShapeDescriptor::of(&v).unwrap();
        let mut buf = vec![0.0; d.size()];
        d.flatten_into(&v, &mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
        let back = d.restore(buf).unwrap();
        assert_eq!(back, v);
        assert_eq!(back["b"][1], 3.0);
        assert_eq!(back.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_flatten_rejects_changed_layout() {
        let d = ShapeDescriptor::Array(vec![2]);
        let mut buf = vec![0.0; 2];
        assert!(d.flatten_into(&Shaped::vector(vec![1.0, 2.0, 3.0]), &mut buf).is_err());
        assert!(d.flatten_into(&Shaped::Scalar(1.0), &mut buf).is_err());
        let named = ShapeDescriptor::of(&named_output()).unwrap();
        let renamed: Output =
            Shaped::named([("x", Shaped::Scalar(1.0)), ("b", Shaped::vector(vec![2.0, 3.0]))]);
        let mut buf = vec![0.0; 3];
        assert!(named.flatten_into(&renamed, &mut buf).is_err());
    }

    #[test]
    fn test_nested_named_rejected() {
        let nested: Output = Shaped::named([("outer", named_output())]);
        assert!(ShapeDescriptor::of(&nested).is_err());
        let dup: Output = Shaped::named([("a", Shaped::Scalar(1.0)), ("a", Shaped::Scalar(2.0))]);
        assert!(ShapeDescriptor::of(&dup).is_err());
    }

    #[test]
    fn test_array_shape_checked() {
        assert!(Shaped::array(vec![2, 2], vec![1.0, 2.0, 3.0]).is_err());
        let empty = Shaped::<f64>::vector(vec![]);
        assert_eq!(ShapeDescriptor::of(&empty).unwrap().size(), 0);
    }

    #[test]
    fn test_uncertain_arithmetic() {
        let a = Uncertain::new(2.0, 0.3);
        let b = Uncertain::new(1.0, 0.4);
        let s = a + b;
        assert!((s.mean - 3.0).abs() < 1e-12);
        assert!((s.sdev - 0.5).abs() < 1e-12);
        let d = a - b;
        assert!((d.sdev - 0.5).abs() < 1e-12);
        let q = a / b;
        assert!((q.mean - 2.0).abs() < 1e-12);
        // (0.3/1)^2 + (2*0.4/1)^2
        assert!((q.sdev - (0.09f64 + 0.64).sqrt()).abs() < 1e-12);
        let p = a * 2.0;
        assert!((p.sdev - 0.6).abs() < 1e-12);
        assert_eq!((-a).mean, -2.0);
        approx::assert_relative_eq!(Uncertain::new(4.0, 0.4).sqrt().sdev, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_uncertain_display() {
        assert_eq!(Uncertain::new(1.90412, 0.01734).to_string(), "1.904(17)");
        assert_eq!(Uncertain::new(7.5712, 0.17).to_string(), "7.57(17)");
        assert_eq!(Uncertain::new(1234.4, 25.0).to_string(), "1234(25)");
        assert_eq!(Uncertain::exact(2.0).to_string(), "2(0)");
    }

    #[test]
    fn test_display_shaped() {
        let v: Shaped<Uncertain> = Shaped::named([
            ("a", Shaped::Scalar(Uncertain::new(1.0, 0.12))),
            ("b", Shaped::vector(vec![Uncertain::new(2.0, 0.23), Uncertain::new(3.0, 0.34)])),
        ]);
        assert_eq!(v.to_string(), "{'a': 1.00(12), 'b': [2.00(23) 3.00(34)]}");
    }
}
