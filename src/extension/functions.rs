//! Scalar functions the extension registers with its host

use super::abi::ScalarFunction;
use crate::bridge::{text, DataType, EngineError, Value};
use crate::session::tls;

/// `duckdb_pgwire(name)`
pub const GREETING: &str = "duckdb_pgwire";

/// `duckdb_pgwire_tls_version(name)`
pub const TLS_VERSION: &str = "duckdb_pgwire_tls_version";

/// `duckdb_pgwire_openssl_version(name)`, kept for callers of the old name
pub const OPENSSL_VERSION: &str = "duckdb_pgwire_openssl_version";

/// `pg_is_in_recovery()`
pub const PG_IS_IN_RECOVERY: &str = "pg_is_in_recovery";

/// `duckdb_pgwire_listen(address)`
pub const LISTEN: &str = "duckdb_pgwire_listen";

/// Greeting returned by `duckdb_pgwire`
pub fn greeting(name: &str) -> String {
    format!("DuckdbPgwire {} 🐥", name)
}

/// Text returned by `duckdb_pgwire_tls_version`
pub fn tls_version(name: &str) -> String {
    format!(
        "DuckdbPgwire {}, my linked TLS version is {}",
        name,
        tls::linked_library()
    )
}

/// Functions with no dependency on the host handle
pub fn stateless() -> Vec<ScalarFunction> {
    vec![
        ScalarFunction::new(GREETING, vec![DataType::Varchar], DataType::Varchar, |args| {
            Ok(Value::Text(greeting(&text_arg(&args[0]))))
        }),
        ScalarFunction::new(
            TLS_VERSION,
            vec![DataType::Varchar],
            DataType::Varchar,
            |args| Ok(Value::Text(tls_version(&text_arg(&args[0])))),
        ),
        ScalarFunction::new(
            OPENSSL_VERSION,
            vec![DataType::Varchar],
            DataType::Varchar,
            |args| Ok(Value::Text(tls_version(&text_arg(&args[0])))),
        ),
        // Clients such as pgAdmin call this on connect
        ScalarFunction::new(PG_IS_IN_RECOVERY, vec![], DataType::Bool, |_| {
            Ok(Value::Bool(false))
        }),
    ]
}

/// Implicit cast of an argument to text
pub(crate) fn text_arg(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => text::encode_value(other)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default(),
    }
}

/// Map a launcher failure to an engine error
pub(crate) fn listen_failed(err: crate::Error) -> EngineError {
    EngineError::new(err.sql_state().to_string(), format!("could not start wire server: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        stateless()
            .into_iter()
            .find(|f| f.name() == name)
            .unwrap()
            .invoke(args)
            .unwrap()
    }

    #[test]
    fn test_greeting() {
        assert_eq!(
            call(GREETING, &[Value::from("Sam")]),
            Value::from("DuckdbPgwire Sam 🐥")
        );
    }

    #[test]
    fn test_tls_version() {
        let Value::Text(text) = call(TLS_VERSION, &[Value::from("Michael")]) else {
            panic!("expected text");
        };
        assert!(text.starts_with("DuckdbPgwire Michael, my linked TLS version is rustls"));
    }

    #[test]
    fn test_openssl_version_alias() {
        assert_eq!(
            call(OPENSSL_VERSION, &[Value::from("Michael")]),
            call(TLS_VERSION, &[Value::from("Michael")])
        );
    }

    #[test]
    fn test_pg_is_in_recovery() {
        assert_eq!(call(PG_IS_IN_RECOVERY, &[]), Value::Bool(false));
    }

    #[test]
    fn test_non_text_argument_is_cast() {
        assert_eq!(
            call(GREETING, &[Value::Int4(7)]),
            Value::from("DuckdbPgwire 7 🐥")
        );
    }

    #[test]
    fn test_null_argument() {
        assert_eq!(call(GREETING, &[Value::Null]), Value::Null);
    }
}
