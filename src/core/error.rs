//! Error taxonomy of the request pipeline and of reactor lifecycle operations.
use std::{fmt, time::Duration};

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::core::lifecycle::LifecycleState;

/// Result of one pipeline stage.
pub type StageResult = Result<(), ExecutionError>;

/// Failure payload rendered to the client when a stage short-circuits on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFailure {
    #[serde(rename = "http_status_code", serialize_with = "serialize_status")]
    pub status: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

impl ExecutionFailure {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            key: None,
            message: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status.as_u16())?;
        if let Some(key) = &self.key {
            write!(f, " [{key}]")?;
        }
        if let Some(message) = &self.message {
            write!(f, " {message}")?;
        }
        Ok(())
    }
}

/// Why a pipeline stage did not complete normally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// Intentional short-circuit without anything to render.
    #[error("execution interrupted")]
    Interrupted,

    /// Intentional short-circuit carrying the failure to render.
    #[error("execution interrupted with failure: {0}")]
    InterruptedWithFailure(ExecutionFailure),

    /// A stage was cancelled because the request deadline elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Unexpected(#[from] eyre::Report),
}

impl ExecutionError {
    pub fn unexpected(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Unexpected(eyre::Report::msg(message))
    }

    /// Interruptions are deliberate decisions of a stage; everything else is
    /// a malfunction worth retrying or logging.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted | Self::InterruptedWithFailure(_))
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::InterruptedWithFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Errors surfaced by reactor lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReactorError {
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("failed to {action} {component}")]
    Component {
        component: &'static str,
        action: &'static str,
        #[source]
        source: eyre::Report,
    },
}

impl ReactorError {
    pub fn component(component: &'static str, action: &'static str, source: eyre::Report) -> Self {
        Self::Component {
            component,
            action,
            source,
        }
    }
}
