//! External tensor storage for large models
//!
//! Constants whose payload exceeds a threshold move out of the model. The
//! initializer keeps its name, dims and type; its `external_data` carries a
//! single `location` key naming the payload in this storage. Writing the
//! payloads next to the model is the caller's job.

use indexmap::IndexMap;

use crate::error::ConvertResult;
use crate::proto::tensor_proto::DataLocation;
use crate::proto::{StringStringEntryProto, TensorProto};

/// Payload size above which a constant is externalized
pub const DEFAULT_EXTERNAL_THRESHOLD: usize = 1024;

/// Key of the external data entry naming the payload
pub const LOCATION_KEY: &str = "location";

/// Location → raw little-endian payload, one unique location per tensor
#[derive(Debug, Clone, Default)]
pub struct ExternalTensorStorage {
    payloads: IndexMap<String, Vec<u8>>,
    threshold: usize,
}

impl ExternalTensorStorage {
    /// Storage externalizing payloads larger than `threshold` bytes
    pub fn new(threshold: usize) -> Self {
        Self {
            payloads: IndexMap::new(),
            threshold,
        }
    }

    /// Size threshold in bytes
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Move the payload of `tensor` here if it is large enough
    ///
    /// Only raw payloads move; string tensors stay inline.
    pub fn externalize(&mut self, tensor: &mut TensorProto) -> ConvertResult<bool> {
        if tensor.raw_data.len() <= self.threshold {
            return Ok(false);
        }
        let location = self.unique_location(&tensor.name);
        self.payloads
            .insert(location.clone(), std::mem::take(&mut tensor.raw_data));
        tensor.data_location = DataLocation::External as i32;
        tensor.external_data = vec![StringStringEntryProto {
            key: LOCATION_KEY.to_string(),
            value: location,
        }];
        Ok(true)
    }

    /// Sanitized name, suffixed with a counter when already taken
    fn unique_location(&self, name: &str) -> String {
        let base = sanitize_location(name);
        if !self.payloads.contains_key(&base) {
            return base;
        }
        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|candidate| !self.payloads.contains_key(candidate))
            .unwrap_or(base)
    }

    /// Payload stored under a location
    pub fn get(&self, location: &str) -> Option<&[u8]> {
        self.payloads.get(location).map(Vec::as_slice)
    }

    /// Stored payloads in write order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.payloads.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of payloads
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Whether nothing was externalized
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Sum of payload sizes
    pub fn total_bytes(&self) -> usize {
        self.payloads.values().map(Vec::len).sum()
    }
}

/// Location safe to use as a file name
fn sanitize_location(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
