use core::fmt;

use super::types::{Format, Type};

/// Information about a column of a query.
#[derive(Clone)]
pub struct Column {
    name: Box<str>,
    r#type: Type,
    index: usize,
    format: Format,
}

impl Column {
    pub(crate) fn new(name: &str, r#type: Type, index: usize, format: Format) -> Column {
        Column {
            name: Box::from(name),
            r#type,
            index,
            format,
        }
    }

    /// Returns the name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type of the column.
    pub fn r#type(&self) -> &Type {
        &self.r#type
    }

    /// Returns the zero-based position of the column in its row.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the wire format of the column's values.
    pub fn format(&self) -> Format {
        self.format
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Column")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("index", &self.index)
            .field("format", &self.format)
            .finish()
    }
}
