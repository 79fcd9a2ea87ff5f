//! Opset bookkeeping
//!
//! Domain names, supported version range, and the mapping from the default
//! domain's opset to the IR version written into the model.
//!
//! | Opset | IR version |
//! |-------|------------|
//! | ≤ 8 | 3 |
//! | 9 | 4 |
//! | 10 | 5 |
//! | 11 | 6 |
//! | 12-14 | 7 |
//! | 15-18 | 8 |

use crate::error::{ConvertError, ConvertResult};
use crate::proto::OperatorSetIdProto;

/// Default ONNX domain
pub const DEFAULT_DOMAIN: &str = "";

/// Classic machine-learning domain (CategoryMapper and friends)
pub const ML_DOMAIN: &str = "ai.onnx.ml";

/// Domain given to ops passed through unconverted by custom handlers
pub const TF_DOMAIN: &str = "ai.onnx.converters.tensorflow";

/// Oldest supported opset of the default domain
pub const MIN_OPSET: i64 = 4;

/// Newest supported opset of the default domain
pub const MAX_OPSET: i64 = 18;

/// Opset used when the caller does not choose one
pub const PREFERRED_OPSET: i64 = MAX_OPSET;

/// One domain import
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpsetId {
    /// Domain name, empty for the default domain
    pub domain: String,
    /// Imported version
    pub version: i64,
}

impl OpsetId {
    /// Create an import entry
    pub fn new(domain: impl Into<String>, version: i64) -> Self {
        Self {
            domain: domain.into(),
            version,
        }
    }

    /// Convert into the message written into the model
    pub fn to_proto(&self) -> OperatorSetIdProto {
        OperatorSetIdProto {
            domain: self.domain.clone(),
            version: self.version,
        }
    }
}

/// Check that the default-domain opset is within the supported range
pub fn validate_opset(version: i64) -> ConvertResult<()> {
    if (MIN_OPSET..=MAX_OPSET).contains(&version) {
        Ok(())
    } else {
        Err(ConvertError::UnsupportedOpset {
            version,
            min: MIN_OPSET,
            max: MAX_OPSET,
        })
    }
}

/// IR version matching an opset of the default domain
pub fn ir_version_for_opset(opset: i64) -> i64 {
    match opset {
        i64::MIN..=8 => 3,
        9 => 4,
        10 => 5,
        11 => 6,
        12..=14 => 7,
        _ => 8,
    }
}

/// Default version imported for a known extra domain
pub fn default_domain_version(domain: &str) -> i64 {
    match domain {
        ML_DOMAIN => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_opset() {
        assert!(validate_opset(4).is_ok());
        assert!(validate_opset(PREFERRED_OPSET).is_ok());
        assert!(validate_opset(3).is_err());
        assert!(validate_opset(19).is_err());
    }

    #[test]
    fn test_ir_version_mapping() {
        assert_eq!(ir_version_for_opset(7), 3);
        assert_eq!(ir_version_for_opset(9), 4);
        assert_eq!(ir_version_for_opset(11), 6);
        assert_eq!(ir_version_for_opset(13), 7);
        assert_eq!(ir_version_for_opset(18), 8);
    }

    #[test]
    fn test_opset_id_proto() {
        let proto = OpsetId::new(ML_DOMAIN, 2).to_proto();
        assert_eq!(proto.domain, "ai.onnx.ml");
        assert_eq!(proto.version, 2);
    }
}
