//! Parameter object handed to user functions.
//!
//! A [`ParamView`] is built once per call (or per worker chunk) from the
//! distribution's layout and then overwritten in place for every sample via
//! [`ParamView::set_flat`].

use std::ops::{Index, Range};

use crate::types::{ShapeDescriptor, Shaped};

/// How an extended entry is derived from its stored counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Derivation {
    /// Stored as `log(name)`, exposed as `name = exp(stored)`.
    Exp,
    /// Stored as `sqrt(name)`, exposed as `name = stored^2`.
    Square,
}

#[derive(Debug, Clone)]
struct DerivedEntry {
    name: String,
    source: Range<usize>,
    target: Range<usize>,
    derivation: Derivation,
}

/// Parameter values in the distribution's own layout.
#[derive(Debug, Clone)]
pub struct ParamView {
    shape: ShapeDescriptor,
    flat: Vec<f64>,
    derived: Vec<DerivedEntry>,
    derived_buf: Vec<f64>,
}

impl ParamView {
    /// Create a view for `shape`, zero-initialised.
    ///
    /// With `extend`, named entries whose keys look like `log(name)` or
    /// `sqrt(name)` also expose `name` (as `exp` / square of the stored value).
    pub fn new(shape: ShapeDescriptor, extend: bool) -> Self {
        let mut derived = Vec::new();
        let mut offset = 0;
        if let (true, ShapeDescriptor::Named(entries)) = (extend, &shape) {
            let mut start = 0;
            for (key, s) in entries {
                let n: usize = s.iter().product();
                if let Some((name, derivation)) = parse_extended_key(key) {
                    let taken = entries.iter().any(|(k, _)| k == name);
                    if !taken {
                        derived.push(DerivedEntry {
                            name: name.to_string(),
                            source: start..start + n,
                            target: offset..offset + n,
                            derivation,
                        });
                        offset += n;
                    }
                }
                start += n;
            }
        }
        let flat = vec![0.0; shape.size()];
        Self { shape, flat, derived, derived_buf: vec![0.0; offset] }
    }

    /// Overwrite all parameter values. `p.len()` must equal the layout size.
    pub fn set_flat(&mut self, p: &[f64]) {
        self.flat.copy_from_slice(p);
        for d in &self.derived {
            let src = &self.flat[d.source.clone()];
            let dst = &mut self.derived_buf[d.target.clone()];
            for (o, &v) in dst.iter_mut().zip(src) {
                *o = match d.derivation {
                    Derivation::Exp => v.exp(),
                    Derivation::Square => v * v,
                };
            }
        }
    }

    /// Flat parameter vector.
    pub fn flat(&self) -> &[f64] {
        &self.flat
    }

    /// Parameter layout.
    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    /// Number of flat parameters.
    pub fn len(&self) -> usize {
        self.flat.len()
    }

    /// `true` for an empty layout.
    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Values of a named entry (including derived extended entries).
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        if let Some((range, _)) = self.shape.entry(name) {
            return Some(&self.flat[range]);
        }
        self.derived.iter().find(|d| d.name == name).map(|d| &self.derived_buf[d.target.clone()])
    }

    /// First value of a named entry, convenient for scalar entries.
    pub fn get_scalar(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.first().copied())
    }

    /// Names accessible through [`Self::get`], stored entries first.
    pub fn names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = match &self.shape {
            ShapeDescriptor::Named(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        };
        out.extend(self.derived.iter().map(|d| d.name.as_str()));
        out
    }

    /// Copy into an owned shaped value (stored entries only).
    pub fn to_shaped(&self) -> Shaped<f64> {
        match self.shape.restore(self.flat.clone()) {
            Ok(v) => v,
            // Layout and buffer are created together, so sizes always agree.
            Err(_) => Shaped::vector(self.flat.clone()),
        }
    }
}

impl Index<usize> for ParamView {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.flat[i]
    }
}

impl Index<&str> for ParamView {
    type Output = [f64];

    fn index(&self, name: &str) -> &[f64] {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no parameter named '{name}'"),
        }
    }
}

fn parse_extended_key(key: &str) -> Option<(&str, Derivation)> {
    let inner = |prefix: &str| {
        key.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(')')).filter(|n| !n.is_empty())
    };
    if let Some(name) = inner("log(") {
        return Some((name, Derivation::Exp));
    }
    inner("sqrt(").map(|name| (name, Derivation::Square))
}
