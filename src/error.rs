use ndarray::ShapeError;
use std::fmt;

#[derive(Debug)]
pub enum AttackError {
    UnsupportedNorm {
        order: String,
    },
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
    ShapeMismatch {
        expected: Vec<usize>,
        given: Vec<usize>,
    },
    LabelOutOfRange {
        label: usize,
        num_classes: usize,
    },
    UnsupportedCapability {
        capability: &'static str,
    },
    Shape {
        err: ShapeError,
    },
    Json {
        err: serde_json::Error,
    },
    Io {
        err: std::io::Error,
    },
}

impl AttackError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(expected: &[usize], given: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            given: given.to_vec(),
        }
    }
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedNorm { order } => write!(
                f,
                "Only ord = inf and ord = 2 have been implemented, got {}",
                order
            ),
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid value for `{}`: {}", field, reason)
            }
            Self::ShapeMismatch { expected, given } => {
                write!(f, "Shape mismatch: expected {:?}, given {:?}", expected, given)
            }
            Self::LabelOutOfRange { label, num_classes } => write!(
                f,
                "Label {} is out of range for a model with {} classes",
                label, num_classes
            ),
            Self::UnsupportedCapability { capability } => {
                write!(f, "Model does not support {}", capability)
            }
            Self::Shape { err } => write!(f, "{}", err),
            Self::Json { err } => write!(f, "{}", err),
            Self::Io { err } => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AttackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape { err } => Some(err),
            Self::Json { err } => Some(err),
            Self::Io { err } => Some(err),
            _ => None,
        }
    }
}

impl From<ShapeError> for AttackError {
    fn from(err: ShapeError) -> Self {
        Self::Shape { err }
    }
}

impl From<serde_json::Error> for AttackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json { err }
    }
}

impl From<std::io::Error> for AttackError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { err }
    }
}
