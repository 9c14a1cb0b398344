use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// A pallet call described by name; arguments stay JSON until encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCall {
    pub module: String,
    pub function: String,
    pub args: Value,
}

impl RuntimeCall {
    pub fn new(module: &str, function: &str, args: Value) -> Self {
        Self {
            module: module.to_string(),
            function: function.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePath {
    pub module: String,
    pub item: String,
}

impl StoragePath {
    pub fn new(module: &str, item: &str) -> Self {
        Self {
            module: module.to_string(),
            item: item.to_string(),
        }
    }
}

/// Metadata-driven encoder/decoder for one runtime version
pub trait CoderFactory: Send + Sync {
    fn encode_call(&self, call: &RuntimeCall) -> CoreResult<Vec<u8>>;

    fn storage_key(&self, path: &StoragePath, keys: &[Value]) -> CoreResult<Vec<u8>>;

    fn decode_storage(&self, path: &StoragePath, data: &[u8]) -> CoreResult<Value>;
}

/// Provides the coder factory for a chain's current runtime
#[async_trait]
pub trait RuntimeCodingService: Send + Sync {
    async fn fetch_coder_factory(&self) -> CoreResult<Arc<dyn CoderFactory>>;
}
