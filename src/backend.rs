//! Backend selection.
//!
//! This module defines the available execution backends for tensor
//! computation. A backend is not global state: every tensor is constructed
//! with a [`Backend`] and every operation on it dispatches on that tag.
//! Results inherit the backend of their (left-most) input.
//!
//! # Supported Backends
//!
//! - `Simple` — Direct strided index loops, single threaded.
//! - `Fast` — Parallel CPU kernels using `rayon` (default).
//! - `Gpu` — WGSL compute kernels through `wgpu` (requires the `wgpu` feature).
//!   Operations fall back to `Fast` whenever the GPU path is unavailable.
//!
//! # Configuration
//!
//! [`Backend::from_env`] reads the `MINITORCH_BACKEND` environment variable
//! (`simple`, `fast` or `gpu`), so a program can pick a backend once at
//! startup and pass it to its tensor constructors.

use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;

use crate::error::Error;

/// Name of the environment variable read by [`Backend::from_env`].
pub const BACKEND_ENV_VAR: &str = "MINITORCH_BACKEND";

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Naive strided loops.
    Simple = 0,
    /// Rayon-parallel CPU backend (default).
    #[default]
    Fast,
    /// GPU-accelerated backend using `wgpu`.
    Gpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Simple),
            1 => Ok(Self::Fast),
            2 => Ok(Self::Gpu),
            _ => Err(()),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "naive" => Ok(Self::Simple),
            "fast" | "cpu" => Ok(Self::Fast),
            "gpu" | "wgpu" | "cuda" => Ok(Self::Gpu),
            other => Err(Error::InvalidArgument {
                arg: "backend",
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Fast => "fast",
            Self::Gpu => "gpu",
        };
        f.write_str(name)
    }
}

impl Backend {
    /// Reads the backend from `MINITORCH_BACKEND`.
    ///
    /// A missing variable yields the default backend. An unrecognised value
    /// is logged and also yields the default.
    ///
    /// # Example
    ///
    /// ```
    /// use minitorch::backend::Backend;
    /// let backend = Backend::from_env();
    /// assert!(matches!(backend, Backend::Simple | Backend::Fast | Backend::Gpu));
    /// ```
    pub fn from_env() -> Self {
        match std::env::var(BACKEND_ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!(%err, "falling back to default backend");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Whether this backend can actually execute kernels in this build.
    ///
    /// `Gpu` needs the `wgpu` feature and a usable adapter; the CPU backends
    /// are always available.
    pub fn is_available(self) -> bool {
        match self {
            Self::Simple | Self::Fast => true,
            Self::Gpu => {
                #[cfg(feature = "wgpu")]
                {
                    crate::ops::gpu::is_available()
                }
                #[cfg(not(feature = "wgpu"))]
                {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Simple".parse::<Backend>().unwrap(), Backend::Simple);
        assert_eq!(" fast ".parse::<Backend>().unwrap(), Backend::Fast);
        assert_eq!("CUDA".parse::<Backend>().unwrap(), Backend::Gpu);
        assert!("tpu".parse::<Backend>().is_err());
    }

    #[test]
    fn round_trips_through_u8_and_display() {
        for b in [Backend::Simple, Backend::Fast, Backend::Gpu] {
            assert_eq!(Backend::try_from(b as u8), Ok(b));
            assert_eq!(b.to_string().parse::<Backend>().unwrap(), b);
        }
        assert_eq!(Backend::try_from(7), Err(()));
    }

    #[test]
    fn cpu_backends_are_available() {
        assert!(Backend::Simple.is_available());
        assert!(Backend::Fast.is_available());
    }
}
