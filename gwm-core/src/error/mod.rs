//! Error handling for gwm
//!
//! Two layers of errors exist in this crate:
//!
//! - [`GwmError`] is returned when an operation as a whole cannot proceed:
//!   a referenced object is missing, the caller is not allowed to act, the
//!   job service could not be reached, or configuration is broken.
//! - [`FieldErrors`](crate::validation::FieldErrors) collects per-field
//!   problems found while validating a request. These never abort the
//!   pipeline; they are accumulated and handed back to the caller together
//!   with the cleaned data. When an operation needs to reject a request as a
//!   whole it wraps them in [`GwmError::InvalidRequest`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      gwm error taxonomy                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Lookup            │  Access             │  Dispatch         │
//! │  • NotFound        │  • Authorization    │  • Transport      │
//! │                    │                     │  • InvalidRequest │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Setup             │  Plumbing                               │
//! │  • Configuration   │  • Serialization • Io • Internal        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{GwmError, GwmResult};

/// Turn a `NotFound` lookup failure into `None`, keeping every other error.
///
/// Lookups defer missing objects to validation instead of failing the whole
/// request, while transport failures still propagate.
pub fn optional<T>(result: GwmResult<T>) -> GwmResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GwmError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_swallows_only_not_found() {
        let missing: GwmResult<u32> = Err(GwmError::not_found("cluster 7"));
        assert!(matches!(optional(missing), Ok(None)));

        let found: GwmResult<u32> = Ok(3);
        assert!(matches!(optional(found), Ok(Some(3))));

        let broken: GwmResult<u32> = Err(GwmError::transport("lookup", "connection reset"));
        assert!(matches!(optional(broken), Err(GwmError::Transport { .. })));
    }
}
