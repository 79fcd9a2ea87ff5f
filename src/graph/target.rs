//! Runtime capability targets
//!
//! Some inference runtimes need workarounds in the emitted graph. Handlers
//! query [`Graph::is_target`](super::Graph::is_target) to apply them.

use std::fmt;
use std::str::FromStr;

use crate::error::ConvertError;

/// Runtime quirk set selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Windows ML RS4: scalar operands of Mul/Add must be 1-D
    Rs4,
    /// Windows ML RS5
    Rs5,
    /// Windows ML RS6
    Rs6,
    /// Caffe2 backend
    Caffe2,
    /// TensorRT backend
    TensorRt,
}

impl Target {
    /// Every known target
    pub const ALL: [Target; 5] = [
        Target::Rs4,
        Target::Rs5,
        Target::Rs6,
        Target::Caffe2,
        Target::TensorRt,
    ];

    /// Name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Rs4 => "rs4",
            Target::Rs5 => "rs5",
            Target::Rs6 => "rs6",
            Target::Caffe2 => "caffe2",
            Target::TensorRt => "tensorrt",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConvertError::Internal(format!("unknown target '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!("rs4".parse::<Target>().unwrap(), Target::Rs4);
        assert_eq!("TensorRT".parse::<Target>().unwrap(), Target::TensorRt);
        assert!("rs9".parse::<Target>().is_err());
        assert_eq!(Target::Caffe2.to_string(), "caffe2");
    }
}
