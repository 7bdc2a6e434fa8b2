//! Payload types flowing between plugin connectors.
//!
//! A [`Payload`] is an immutable, reference-counted sample sequence. Plugins
//! publish payloads to output connectors and read them from input
//! connectors; cloning a payload only bumps a reference count, so fanning
//! one output into several inputs never copies sample data.
//!
//! Two kinds exist, mirroring what the hardware produces and what the DSP
//! stages consume:
//!
//! - [`Payload::U32`]: raw digitizer samples (32-bit words as read out).
//! - [`Payload::F64`]: processed values (baselines, spectra, averages).
//!
//! [`PayloadKind`] is the declared type of a connector and is checked when
//! two connectors are linked, so a kind mismatch is a build-time error and
//! never a run-time surprise.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Declared payload type of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Sequence of unsigned 32-bit samples.
    U32,
    /// Sequence of double-precision values.
    F64,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::U32 => write!(f, "u32"),
            PayloadKind::F64 => write!(f, "f64"),
        }
    }
}

/// An immutable sample sequence shared between connectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    U32(Arc<[u32]>),
    F64(Arc<[f64]>),
}

impl Payload {
    /// Wrap raw digitizer samples.
    pub fn from_u32(samples: Vec<u32>) -> Self {
        Payload::U32(samples.into())
    }

    /// Wrap processed values.
    pub fn from_f64(values: Vec<f64>) -> Self {
        Payload::F64(values.into())
    }

    /// The kind tag of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::U32(_) => PayloadKind::U32,
            Payload::F64(_) => PayloadKind::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::U32(v) => v.len(),
            Payload::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the samples if this is a `U32` payload.
    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Payload::U32(v) => Some(v),
            Payload::F64(_) => None,
        }
    }

    /// Borrow the values if this is an `F64` payload.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Payload::F64(v) => Some(v),
            Payload::U32(_) => None,
        }
    }

    /// View the payload as doubles, converting raw samples if necessary.
    ///
    /// Returns `Cow` to avoid an allocation for the `F64` variant.
    pub fn to_f64(&self) -> Cow<'_, [f64]> {
        match self {
            Payload::U32(v) => Cow::Owned(v.iter().map(|&s| s as f64).collect()),
            Payload::F64(v) => Cow::Borrowed(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_shallow() {
        let a = Payload::from_u32(vec![1, 2, 3]);
        let b = a.clone();
        match (&a, &b) {
            (Payload::U32(x), Payload::U32(y)) => assert!(Arc::ptr_eq(x, y)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Payload::from_u32(vec![]).kind(), PayloadKind::U32);
        assert_eq!(Payload::from_f64(vec![]).kind(), PayloadKind::F64);
    }

    #[test]
    fn to_f64_converts_samples() {
        let p = Payload::from_u32(vec![0, 4095]);
        assert_eq!(p.to_f64().as_ref(), &[0.0, 4095.0]);
    }

    #[test]
    fn accessors_reject_wrong_kind() {
        let p = Payload::from_f64(vec![1.0]);
        assert!(p.as_u32().is_none());
        assert!(p.as_f64().is_some());
    }
}
