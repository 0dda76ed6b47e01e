//! In-process reference host
//!
//! [`Catalog`] stands in for the embedded engine: it keeps the scalar
//! functions registered by the extension and answers the small `SELECT`
//! surface understood by [`parser`]. Enough to run the wire server end to end.

pub mod parser;

use crate::bridge::{Column, DataType, Engine, EngineError, Row, RowStream, Value};
use crate::extension::{ExtensionHost, FunctionTable, RegistrationError, ScalarFunction};
use futures::stream;
use parking_lot::RwLock;
use parser::{Expr, SelectItem, Statement};
use std::sync::atomic::{AtomicBool, Ordering};

// Rows produced by range() between cooperative yields
const RANGE_YIELD_EVERY: i64 = 1024;

/// Function catalog acting as both extension host and query engine
#[derive(Debug, Default)]
pub struct Catalog {
    functions: RwLock<FunctionTable>,
    closed: AtomicBool,
}

impl Catalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of registered functions, sorted
    pub fn function_names(&self) -> Vec<String> {
        self.functions.read().names().map(str::to_string).collect()
    }

    /// Invalidate the handle; later registrations fail with `InvalidHost`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Evaluate a projection-only SELECT into a single row
    fn select(&self, items: &[SelectItem]) -> Result<RowStream, EngineError> {
        let mut columns = Vec::with_capacity(items.len());
        let mut row = Vec::with_capacity(items.len());

        for item in items {
            let (value, declared, default_name) = match &item.expr {
                Expr::Literal(value) => (value.clone(), value.data_type(), "?column?".to_string()),
                Expr::Call { name, .. } => {
                    let return_type = self.lookup(name, &item.expr)?.return_type();
                    (self.eval(&item.expr)?, return_type, name.clone())
                }
            };
            // Bare NULL literals are reported as text
            let data_type = match declared {
                DataType::Unknown => DataType::Text,
                other => other,
            };
            columns.push(Column::new(item.alias.clone().unwrap_or(default_name), data_type));
            row.push(value);
        }

        Ok(RowStream::from_rows(columns, vec![row]))
    }

    fn eval(&self, expr: &Expr) -> Result<Value, EngineError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let function = self.lookup(name, expr)?;
                function.invoke(&args)
            }
        }
    }

    /// Clone the function out so no lock is held while it runs
    fn lookup(&self, name: &str, call: &Expr) -> Result<ScalarFunction, EngineError> {
        self.functions.read().get(name).cloned().ok_or_else(|| {
            let arg_types = match call {
                Expr::Call { args, .. } => args
                    .iter()
                    .map(|a| match a {
                        Expr::Literal(v) => v.data_type().name(),
                        Expr::Call { .. } => "unknown",
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Expr::Literal(_) => String::new(),
            };
            EngineError::undefined_function(format!(
                "function {}({}) does not exist",
                name, arg_types
            ))
            .with_detail("No function matches the given name and argument types.")
        })
    }
}

/// Lazy `range(n)` stream of `bigint` rows `0..n`
fn range(count: i64) -> RowStream {
    let rows = stream::unfold(0i64, move |next| async move {
        if next >= count {
            return None;
        }
        if next > 0 && next % RANGE_YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        let row: Row = vec![Value::Int8(next)];
        Some((Ok(row), next + 1))
    });
    RowStream::new(vec![Column::new("range", DataType::Int8)], rows)
}

impl ExtensionHost for Catalog {
    fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.read().contains(name)
    }

    fn register_scalar_function(&self, function: ScalarFunction) -> Result<(), RegistrationError> {
        if !self.is_valid() {
            return Err(RegistrationError::InvalidHost);
        }
        tracing::debug!(function = %function, "registering scalar function");
        self.functions.write().insert(function)
    }
}

impl Engine for Catalog {
    async fn execute(&self, sql: &str) -> Result<RowStream, EngineError> {
        match parser::parse(sql)? {
            Statement::Select(items) => self.select(&items),
            Statement::Range(count) => Ok(range(count)),
            Statement::Command(tag) => Ok(RowStream::command(tag)),
        }
    }
}
