// SPDX-License-Identifier: GPL-2.0-or-later

use std::fmt::{self, Display};

use thiserror::Error;

use crate::generators::GeneratorError;
use crate::runtime::DialError;
use crate::vars::ExpressionError;

/// Errors of a protocol request execution.
///
/// Configuration errors abort the execution; build errors drop the
/// affected payload variant; I/O and cancellation errors are transient
/// and join the execution's multi-error aggregate.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("could not build request: {0}")]
    Build(String),
    #[error(transparent)]
    Unresolved(#[from] ExpressionError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dns query failed: {0}")]
    Dns(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("no open ports found: {0}")]
    NoOpenPorts(MultiError),
    #[error("{0}")]
    Multiple(MultiError),
}

/// Collects the recoverable errors of one execution.
#[derive(Debug, Default)]
pub struct MultiError(Vec<RequestError>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: RequestError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[RequestError] {
        &self.0
    }

    /// Consumes the aggregate, returning an error only if any were
    /// collected. A single error is unwrapped from the aggregate.
    pub fn into_result(mut self) -> Result<(), RequestError> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(RequestError::Multiple(self)),
        }
    }
}

impl Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl From<Vec<RequestError>> for MultiError {
    fn from(errors: Vec<RequestError>) -> Self {
        Self(errors)
    }
}
