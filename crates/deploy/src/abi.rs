//! Constructor argument handling.

use alloy_core::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered constructor arguments, as written in configuration.
///
/// Values stay loosely typed until they are encoded against the contract ABI, so
/// `"1000"`, `1000` and `"0x3e8"` are all acceptable for a `uint256`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstructorArgs(Vec<Value>);

impl ConstructorArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn from_strs<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        Self(values.into_iter().map(|v| Value::String(v.to_string())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// ABI-encode the arguments against the constructor declared in `abi`.
    pub fn encode(&self, abi: &JsonAbi) -> Result<Bytes> {
        let inputs = abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();

        if inputs.len() != self.0.len() {
            anyhow::bail!(
                "constructor expects {} argument(s), got {}",
                inputs.len(),
                self.0.len()
            );
        }

        let values = inputs
            .iter()
            .zip(&self.0)
            .enumerate()
            .map(|(i, (param, value))| {
                let ty = param
                    .resolve()
                    .with_context(|| format!("unsupported type '{}' for argument {}", param.ty, i))?;
                ty.coerce_str(&to_abi_literal(value)).with_context(|| {
                    format!("argument {} ({}) is not a valid {}", i, value, param.ty)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Bytes::from(DynSolValue::Tuple(values).abi_encode_params()))
    }
}

impl From<Vec<Value>> for ConstructorArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Render a JSON value in the literal syntax accepted by the dynamic ABI parser.
fn to_abi_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_abi_literal).collect();
            format!("[{}]", items.join(","))
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
