//! # Operation Results
//!
//! Typed outcomes returned by the client operations. A result is built once
//! per call and never mutated afterwards, so every type exposes accessors
//! rather than public fields.
//!
//! A failed result means the server answered but did not perform the
//! operation (missing key, `CLIENT_ERROR`, ...). Transport faults never
//! produce a result; they are returned as `ClientError`.

use bytes::Bytes;

use crate::types::StatusCode;

/// Outcome of an increment or decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateResult {
    success: bool,
    value: u64,
    status_code: Option<StatusCode>,
    message: Option<String>,
}

impl MutateResult {
    /// Counter value reported by the server.
    pub fn success(value: u64) -> Self {
        MutateResult {
            success: true,
            value,
            status_code: Some(StatusCode::SUCCESS),
            message: None,
        }
    }

    /// Server refused the mutation.
    pub fn failure(status_code: StatusCode, message: Option<String>) -> Self {
        MutateResult {
            success: false,
            value: 0,
            status_code: Some(status_code),
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Resulting counter value; zero when the operation failed.
    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Outcome of a touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchResult {
    success: bool,
    status_code: Option<StatusCode>,
    message: Option<String>,
}

impl TouchResult {
    pub fn success() -> Self {
        TouchResult {
            success: true,
            status_code: Some(StatusCode::SUCCESS),
            message: None,
        }
    }

    pub fn failure(status_code: StatusCode, message: Option<String>) -> Self {
        TouchResult {
            success: false,
            status_code: Some(status_code),
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Outcome of set, add and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResult {
    success: bool,
    status_code: Option<StatusCode>,
    message: Option<String>,
}

impl StoreResult {
    pub fn success() -> Self {
        StoreResult {
            success: true,
            status_code: Some(StatusCode::SUCCESS),
            message: None,
        }
    }

    pub fn failure(status_code: StatusCode, message: Option<String>) -> Self {
        StoreResult {
            success: false,
            status_code: Some(status_code),
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Outcome of a get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResult {
    success: bool,
    value: Option<Bytes>,
    flags: u32,
    status_code: Option<StatusCode>,
    message: Option<String>,
}

impl GetResult {
    /// Item found with its client flags.
    pub fn hit(value: Bytes, flags: u32) -> Self {
        GetResult {
            success: true,
            value: Some(value),
            flags,
            status_code: Some(StatusCode::SUCCESS),
            message: None,
        }
    }

    /// Item missing or expired.
    pub fn miss() -> Self {
        GetResult::failure(StatusCode::KEY_NOT_FOUND, None)
    }

    pub fn failure(status_code: StatusCode, message: Option<String>) -> Self {
        GetResult {
            success: false,
            value: None,
            flags: 0,
            status_code: Some(status_code),
            message,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Consumes the result, returning the payload if present.
    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
