//! `xml` values.

use std::fmt;

use sqlwire_protocol::XmlSchemaRef;

/// Schema collection bound to an `xml` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlSchema {
    /// Database holding the collection.
    pub db_name: String,
    /// Owning schema.
    pub owner: String,
    /// Collection name.
    pub collection: String,
}

impl From<&XmlSchemaRef> for XmlSchema {
    fn from(schema: &XmlSchemaRef) -> Self {
        Self {
            db_name: schema.db_name.clone(),
            owner: schema.owner.clone(),
            collection: schema.collection.clone(),
        }
    }
}

/// An XML document and, for typed XML, its schema binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct XmlData {
    data: String,
    schema: Option<XmlSchema>,
}

impl XmlData {
    /// Untyped XML.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            schema: None,
        }
    }

    /// Attach the schema binding of the source column.
    #[must_use]
    pub fn with_schema(mut self, schema: XmlSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Document text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Schema binding, if the column is typed.
    #[must_use]
    pub fn schema(&self) -> Option<&XmlSchema> {
        self.schema.as_ref()
    }

    /// Take the document text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.data
    }
}

impl fmt::Display for XmlData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

impl From<String> for XmlData {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<&str> for XmlData {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}
