//! Turns user functions into fixed-length flat rows.
//!
//! A call starts with a probe: the user function is evaluated once at the
//! distribution mean and its output fixes the [`ShapeDescriptor`] and the
//! [`FlatBuffer`] length for the rest of the call. Every later evaluation is
//! flattened into that layout.

use ns_core::{Error, Output, ParamView, Result, ShapeDescriptor};

/// User function returning a shaped value.
pub type ShapedFn<'a> = &'a (dyn Fn(&ParamView) -> Result<Output> + Sync);

/// User function writing a pre-flattened row, density slot included.
pub type FlatFn<'a> = &'a (dyn Fn(&ParamView, &mut [f64]) -> Result<()> + Sync);

/// Per-sample row: `[1, f...]` with the density slot, `[f...]` without.
pub type FlatBuffer = Box<[f64]>;

#[derive(Clone, Copy)]
enum Source<'a> {
    DensityOnly,
    Shaped(ShapedFn<'a>),
    Flat(FlatFn<'a>),
}

/// Call-scoped output layout plus the function that fills it.
#[derive(Clone)]
pub struct IntegrandAdapter<'a> {
    source: Source<'a>,
    shape: ShapeDescriptor,
    density_slot: bool,
    len: usize,
}

impl<'a> IntegrandAdapter<'a> {
    /// Probe `f` at `view` and fix the layout for this call.
    ///
    /// Without a function only the density slot is integrated; asking for
    /// neither is a configuration error.
    pub fn probe(f: Option<ShapedFn<'a>>, density_slot: bool, view: &ParamView) -> Result<Self> {
        let (source, shape) = match f {
            None if !density_slot => {
                return Err(Error::Validation(
                    "no function and no density requested: nothing to integrate".into(),
                ));
            }
            None => (Source::DensityOnly, ShapeDescriptor::Array(vec![0])),
            Some(f) => {
                let probe = f(view)?;
                (Source::Shaped(f), ShapeDescriptor::of(&probe)?)
            }
        };
        let len = shape.size() + usize::from(density_slot);
        Ok(Self { source, shape, density_slot, len })
    }

    /// Adapter for a function that already writes `len` flat slots per sample.
    pub fn flat(f: FlatFn<'a>, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::Validation("flat integrand must produce at least one value".into()));
        }
        Ok(Self {
            source: Source::Flat(f),
            shape: ShapeDescriptor::Array(vec![len]),
            density_slot: false,
            len,
        })
    }

    /// Layout of the user output (without the density slot).
    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    /// Whether slot 0 carries the density.
    pub fn density_slot(&self) -> bool {
        self.density_slot
    }

    /// Slots per sample.
    pub fn buffer_len(&self) -> usize {
        self.len
    }

    /// Zeroed buffer of [`Self::buffer_len`] slots.
    pub fn new_buffer(&self) -> FlatBuffer {
        vec![0.0; self.len].into_boxed_slice()
    }

    /// Evaluate at `view` and write the row into `buf`.
    pub fn fill(&self, view: &ParamView, buf: &mut [f64]) -> Result<()> {
        let offset = usize::from(self.density_slot);
        if self.density_slot {
            buf[0] = 1.0;
        }
        match self.source {
            Source::DensityOnly => Ok(()),
            Source::Shaped(f) => {
                let out = f(view)?;
                self.shape.flatten_into(&out, &mut buf[offset..])
            }
            Source::Flat(f) => f(view, buf),
        }
    }
}
