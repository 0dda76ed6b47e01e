//! Versioned registration interface between the extension and its host

use crate::bridge::{DataType, EngineError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Version of the registration interface this crate speaks.
///
/// Bumped whenever [`ExtensionHost`] or [`ScalarFunction`] change shape; a
/// host reporting any other version is refused.
pub const EXTENSION_ABI_VERSION: u32 = 1;

type ScalarBody = dyn Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync;

/// Named scalar function with a fixed signature
#[derive(Clone)]
pub struct ScalarFunction {
    name: String,
    arguments: Vec<DataType>,
    return_type: DataType,
    body: Arc<ScalarBody>,
}

impl ScalarFunction {
    /// Create a function from its signature and body
    pub fn new<F>(
        name: impl Into<String>,
        arguments: Vec<DataType>,
        return_type: DataType,
        body: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arguments,
            return_type,
            body: Arc::new(body),
        }
    }

    /// Function name as called from SQL
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared argument types
    pub fn arguments(&self) -> &[DataType] {
        &self.arguments
    }

    /// Declared result type
    pub fn return_type(&self) -> DataType {
        self.return_type
    }

    /// Call the function.
    ///
    /// Arity is checked against the signature. A NULL argument yields NULL
    /// without running the body.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, EngineError> {
        if args.len() != self.arguments.len() {
            let given: Vec<&str> = args.iter().map(|v| v.data_type().name()).collect();
            return Err(EngineError::undefined_function(format!(
                "function {}({}) does not exist",
                self.name,
                given.join(", ")
            ))
            .with_detail(format!("expected {}", self)));
        }
        if args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        (self.body)(args)
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = self.arguments.iter().map(|t| t.name()).collect();
        write!(f, "{}({}) -> {}", self.name, args.join(", "), self.return_type)
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("signature", &self.to_string())
            .finish()
    }
}

/// Function table kept by a host, keyed by name
#[derive(Debug, Clone)]
pub struct FunctionTable {
    abi_version: u32,
    functions: BTreeMap<String, ScalarFunction>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTable {
    /// Empty table at the current ABI version
    pub fn new() -> Self {
        Self {
            abi_version: EXTENSION_ABI_VERSION,
            functions: BTreeMap::new(),
        }
    }

    /// ABI version the table was built for
    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    /// Add a function; names are unique
    pub fn insert(&mut self, function: ScalarFunction) -> Result<(), RegistrationError> {
        if self.functions.contains_key(function.name()) {
            return Err(RegistrationError::DuplicateFunction(function.name().to_string()));
        }
        self.functions.insert(function.name().to_string(), function);
        Ok(())
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&ScalarFunction> {
        self.functions.get(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Host side of the load contract
pub trait ExtensionHost: Send + Sync + 'static {
    /// Registration interface version the host implements
    fn abi_version(&self) -> u32 {
        EXTENSION_ABI_VERSION
    }

    /// Whether the handle still refers to a live host
    fn is_valid(&self) -> bool {
        true
    }

    /// Whether a function named `name` is already registered
    fn has_function(&self, name: &str) -> bool;

    /// Add a scalar function to the host's catalog
    fn register_scalar_function(&self, function: ScalarFunction) -> Result<(), RegistrationError>;
}

/// Registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Host handle is null, closed or otherwise unusable
    #[error("invalid host handle")]
    InvalidHost,

    /// Host speaks another version of the registration interface
    #[error("extension ABI version mismatch: extension {expected}, host {found}")]
    AbiMismatch {
        /// Version this crate implements
        expected: u32,
        /// Version the host reported
        found: u32,
    },

    /// Name already taken by another function
    #[error("function \"{0}\" already exists")]
    DuplicateFunction(String),

    /// Host refused the function for its own reasons
    #[error("host rejected function \"{name}\": {reason}")]
    Rejected {
        /// Function name
        name: String,
        /// Host-supplied reason
        reason: String,
    },
}

impl RegistrationError {
    /// Whether registration must stop instead of collecting the error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidHost | Self::AbiMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> ScalarFunction {
        ScalarFunction::new("upper", vec![DataType::Text], DataType::Text, |args| {
            Ok(Value::Text(args[0].as_str().unwrap_or_default().to_uppercase()))
        })
    }

    #[test]
    fn test_invoke() {
        assert_eq!(
            upper().invoke(&[Value::from("duck")]).unwrap(),
            Value::from("DUCK")
        );
    }

    #[test]
    fn test_invoke_wrong_arity() {
        let err = upper().invoke(&[]).unwrap_err();
        assert_eq!(err.code(), crate::protocol::sql_state::UNDEFINED_FUNCTION);
        assert_eq!(err.message(), "function upper() does not exist");
        assert_eq!(err.detail(), Some("expected upper(text) -> text"));
    }

    #[test]
    fn test_null_argument_short_circuits() {
        assert_eq!(upper().invoke(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_table_rejects_duplicates() {
        let mut table = FunctionTable::new();
        table.insert(upper()).unwrap();
        assert_eq!(
            table.insert(upper()),
            Err(RegistrationError::DuplicateFunction("upper".into()))
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.abi_version(), EXTENSION_ABI_VERSION);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(RegistrationError::InvalidHost.is_fatal());
        assert!(RegistrationError::AbiMismatch {
            expected: 1,
            found: 2
        }
        .is_fatal());
        assert!(!RegistrationError::DuplicateFunction("f".into()).is_fatal());
    }
}
