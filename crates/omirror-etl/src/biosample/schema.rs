//! Columnar layout of EBI BioSample records
//!
//! Matches the API's JSON after `characteristics` has been flattened into a
//! list (see [`super::fetcher::flatten_characteristics`]). Keys the API sends
//! beyond these columns are dropped at write time.

use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use std::sync::Arc;

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, true)
}

fn struct_field(name: &str, fields: Vec<Field>) -> Field {
    Field::new(name, DataType::Struct(Fields::from(fields)), true)
}

fn list_of(name: &str, item: DataType) -> Field {
    Field::new(name, DataType::List(Arc::new(Field::new("item", item, true))), true)
}

fn list_of_structs(name: &str, fields: Vec<Field>) -> Field {
    list_of(name, DataType::Struct(Fields::from(fields)))
}

fn href(name: &str) -> Field {
    struct_field(name, vec![utf8("href")])
}

pub fn arrow_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("accession", DataType::Utf8, false),
        utf8("name"),
        utf8("update"),
        utf8("release"),
        utf8("create"),
        Field::new("taxId", DataType::Int64, true),
        list_of_structs(
            "characteristics",
            vec![
                utf8("text"),
                list_of("ontologyTerms", DataType::Utf8),
                utf8("unit"),
                utf8("characteristic"),
            ],
        ),
        list_of_structs(
            "organization",
            vec![
                utf8("Name"),
                utf8("Role"),
                utf8("Address"),
                utf8("URI"),
                utf8("Email"),
            ],
        ),
        list_of_structs("contact", vec![utf8("Name"), utf8("Role"), utf8("Email")]),
        list_of_structs("publications", vec![utf8("pubmed_id"), utf8("doi")]),
        list_of_structs(
            "externalReferences",
            vec![utf8("url"), list_of("duo", DataType::Utf8)],
        ),
        struct_field(
            "_links",
            vec![
                href("self"),
                href("curationLinks"),
                href("samples"),
                href("curationLink"),
            ],
        ),
    ]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::validate_record;
    use serde_json::json;

    #[test]
    fn test_flattened_sample_conforms() {
        let sample = json!({
            "accession": "SAMEA1",
            "name": "liver",
            "update": "2024-03-01T10:00:00Z",
            "taxId": 9606,
            "characteristics": [
                {"text": "liver", "ontologyTerms": ["http://purl.obolibrary.org/obo/UBERON_0002107"], "characteristic": "organism part"}
            ],
            "structuredData": [],
            "_links": {"self": {"href": "https://x/SAMEA1"}, "curationLinks": {"href": "https://x/c", "templated": true}}
        });
        validate_record(&arrow_schema(), &sample).unwrap();
    }

    #[test]
    fn test_requires_accession() {
        let err = validate_record(&arrow_schema(), &json!({"name": "x"})).unwrap_err();
        assert!(err.to_string().contains("accession"));
    }
}
