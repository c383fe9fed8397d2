//! Columnar layout of SRA records and the XML-to-row conversion for each
//! entity

use super::mirror::Entity;
use super::xml::XmlNode;
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub(crate) fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, true)
}

pub(crate) fn struct_of(fields: Vec<Field>) -> DataType {
    DataType::Struct(Fields::from(fields))
}

pub(crate) fn list_of(name: &str, item: DataType) -> Field {
    Field::new(name, DataType::List(Arc::new(Field::new("item", item, true))), true)
}

fn identifiers() -> Field {
    list_of(
        "identifiers",
        struct_of(vec![utf8("namespace"), utf8("id"), utf8("uuid")]),
    )
}

fn attributes() -> Field {
    list_of("attributes", struct_of(vec![utf8("tag"), utf8("value")]))
}

fn xrefs() -> Field {
    list_of("xrefs", struct_of(vec![utf8("db"), utf8("id")]))
}

fn accession() -> Field {
    Field::new("accession", DataType::Utf8, false)
}

/// Arrow schema of one entity's part files
pub fn arrow_schema(entity: Entity) -> SchemaRef {
    let fields = match entity {
        Entity::Study => vec![
            accession(),
            utf8("alias"),
            utf8("title"),
            utf8("description"),
            utf8("abstract"),
            utf8("study_type"),
            utf8("center_name"),
            utf8("broker_name"),
            utf8("BioProject"),
            utf8("GEO"),
            identifiers(),
            attributes(),
            xrefs(),
            list_of("pubmed_ids", DataType::Utf8),
        ],
        Entity::Sample => vec![
            accession(),
            utf8("alias"),
            utf8("title"),
            utf8("organism"),
            utf8("description"),
            Field::new("taxon_id", DataType::Int32, true),
            utf8("geo"),
            utf8("BioSample"),
            identifiers(),
            attributes(),
            xrefs(),
        ],
        Entity::Experiment => vec![
            accession(),
            utf8("alias"),
            utf8("title"),
            utf8("description"),
            utf8("design"),
            utf8("center_name"),
            utf8("study_accession"),
            utf8("sample_accession"),
            utf8("platform"),
            utf8("instrument_model"),
            utf8("library_name"),
            utf8("library_construction_protocol"),
            utf8("library_layout"),
            utf8("library_layout_length"),
            utf8("library_layout_sdev"),
            utf8("library_strategy"),
            utf8("library_source"),
            utf8("library_selection"),
            identifiers(),
            attributes(),
            xrefs(),
        ],
        Entity::Run => vec![
            accession(),
            utf8("alias"),
            utf8("experiment_accession"),
            utf8("title"),
            utf8("center_name"),
            Field::new("total_spots", DataType::Int64, true),
            Field::new("total_bases", DataType::Int64, true),
            Field::new("size", DataType::Int64, true),
            utf8("published"),
            identifiers(),
            attributes(),
        ],
    };
    Arc::new(Schema::new(fields))
}

/// Convert one record element into a row for `entity`'s schema
pub fn to_row(entity: Entity, node: &XmlNode) -> Value {
    match entity {
        Entity::Study => study_row(node),
        Entity::Sample => sample_row(node),
        Entity::Experiment => experiment_row(node),
        Entity::Run => run_row(node),
    }
}

pub(crate) fn opt(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

pub(crate) fn int(value: Option<&str>) -> Value {
    value
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map_or(Value::Null, Value::from)
}

fn accession_of(node: &XmlNode) -> Value {
    opt(node
        .attr("accession")
        .or_else(|| node.text_at(&["IDENTIFIERS", "PRIMARY_ID"])))
}

fn identifier_list(node: &XmlNode) -> Value {
    let ids: Vec<Value> = node
        .child("IDENTIFIERS")
        .map(|ids| {
            ids.children
                .iter()
                .map(|id| {
                    let kind = id.name.trim_end_matches("_ID").to_ascii_lowercase();
                    json!({
                        "namespace": id.attr("namespace").map(str::to_string).unwrap_or(kind),
                        "id": opt(id.text()),
                        "uuid": opt(id.attr("uuid")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Value::Array(ids)
}

fn attribute_list(node: &XmlNode, container: &str, item: &str) -> Value {
    let attrs: Vec<Value> = node
        .child(container)
        .map(|c| {
            c.children_named(item)
                .map(|a| json!({"tag": opt(a.text_at(&["TAG"])), "value": opt(a.text_at(&["VALUE"]))}))
                .collect()
        })
        .unwrap_or_default();
    Value::Array(attrs)
}

fn xref_pairs<'a>(node: &'a XmlNode, container: &str, item: &'a str) -> Vec<(&'a str, &'a str)> {
    node.child(container)
        .map(|c| {
            c.children_named(item)
                .filter_map(|link| link.child("XREF_LINK"))
                .filter_map(|x| Some((x.text_at(&["DB"])?, x.text_at(&["ID"])?)))
                .collect()
        })
        .unwrap_or_default()
}

fn xref_list(pairs: &[(&str, &str)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(db, id)| json!({"db": db, "id": id}))
            .collect(),
    )
}

fn external_id<'a>(node: &'a XmlNode, namespace: &str) -> Option<&'a str> {
    node.child("IDENTIFIERS")?
        .children_named("EXTERNAL_ID")
        .find(|id| id.attr("namespace") == Some(namespace))
        .and_then(|id| id.text())
}

fn study_row(node: &XmlNode) -> Value {
    let descriptor = node.child("DESCRIPTOR");
    let d = |name: &str| descriptor.and_then(|d| d.text_at(&[name]));
    let xrefs = xref_pairs(node, "STUDY_LINKS", "STUDY_LINK");
    let pubmed: Vec<&str> = xrefs
        .iter()
        .filter(|(db, _)| db.eq_ignore_ascii_case("pubmed"))
        .map(|(_, id)| *id)
        .collect();

    let mut row = Map::new();
    row.insert("accession".into(), accession_of(node));
    row.insert("alias".into(), opt(node.attr("alias")));
    row.insert("title".into(), opt(d("STUDY_TITLE")));
    row.insert("description".into(), opt(d("STUDY_DESCRIPTION")));
    row.insert("abstract".into(), opt(d("STUDY_ABSTRACT")));
    row.insert(
        "study_type".into(),
        opt(descriptor
            .and_then(|d| d.child("STUDY_TYPE"))
            .and_then(|t| t.attr("existing_study_type"))),
    );
    row.insert("center_name".into(), opt(node.attr("center_name")));
    row.insert("broker_name".into(), opt(node.attr("broker_name")));
    row.insert("BioProject".into(), opt(external_id(node, "BioProject")));
    row.insert("GEO".into(), opt(external_id(node, "GEO")));
    row.insert("identifiers".into(), identifier_list(node));
    row.insert(
        "attributes".into(),
        attribute_list(node, "STUDY_ATTRIBUTES", "STUDY_ATTRIBUTE"),
    );
    row.insert("xrefs".into(), xref_list(&xrefs));
    row.insert("pubmed_ids".into(), json!(pubmed));
    Value::Object(row)
}

fn sample_row(node: &XmlNode) -> Value {
    let mut row = Map::new();
    row.insert("accession".into(), accession_of(node));
    row.insert("alias".into(), opt(node.attr("alias")));
    row.insert("title".into(), opt(node.text_at(&["TITLE"])));
    row.insert(
        "organism".into(),
        opt(node.text_at(&["SAMPLE_NAME", "SCIENTIFIC_NAME"])),
    );
    row.insert("description".into(), opt(node.text_at(&["DESCRIPTION"])));
    row.insert(
        "taxon_id".into(),
        int(node.text_at(&["SAMPLE_NAME", "TAXON_ID"])),
    );
    row.insert("geo".into(), opt(external_id(node, "GEO")));
    row.insert("BioSample".into(), opt(external_id(node, "BioSample")));
    row.insert("identifiers".into(), identifier_list(node));
    row.insert(
        "attributes".into(),
        attribute_list(node, "SAMPLE_ATTRIBUTES", "SAMPLE_ATTRIBUTE"),
    );
    row.insert(
        "xrefs".into(),
        xref_list(&xref_pairs(node, "SAMPLE_LINKS", "SAMPLE_LINK")),
    );
    Value::Object(row)
}

fn experiment_row(node: &XmlNode) -> Value {
    let design = node.child("DESIGN");
    let library = design.and_then(|d| d.child("LIBRARY_DESCRIPTOR"));
    let lib = |name: &str| library.and_then(|l| l.text_at(&[name]));
    let layout = library
        .and_then(|l| l.child("LIBRARY_LAYOUT"))
        .and_then(|l| l.children.first());
    // PLATFORM holds a single vendor element, e.g. <ILLUMINA>
    let platform = node.child("PLATFORM").and_then(|p| p.children.first());

    let mut row = Map::new();
    row.insert("accession".into(), accession_of(node));
    row.insert("alias".into(), opt(node.attr("alias")));
    row.insert("title".into(), opt(node.text_at(&["TITLE"])));
    row.insert("description".into(), opt(node.text_at(&["DESCRIPTION"])));
    row.insert("design".into(), opt(design.and_then(|d| d.text_at(&["DESIGN_DESCRIPTION"]))));
    row.insert("center_name".into(), opt(node.attr("center_name")));
    row.insert(
        "study_accession".into(),
        opt(node.child("STUDY_REF").and_then(|s| s.attr("accession"))),
    );
    row.insert(
        "sample_accession".into(),
        opt(design
            .and_then(|d| d.child("SAMPLE_DESCRIPTOR"))
            .and_then(|s| s.attr("accession"))),
    );
    row.insert("platform".into(), opt(platform.map(|p| p.name.as_str())));
    row.insert(
        "instrument_model".into(),
        opt(platform.and_then(|p| p.text_at(&["INSTRUMENT_MODEL"]))),
    );
    row.insert("library_name".into(), opt(lib("LIBRARY_NAME")));
    row.insert(
        "library_construction_protocol".into(),
        opt(lib("LIBRARY_CONSTRUCTION_PROTOCOL")),
    );
    row.insert("library_layout".into(), opt(layout.map(|l| l.name.as_str())));
    row.insert(
        "library_layout_length".into(),
        opt(layout.and_then(|l| l.attr("NOMINAL_LENGTH"))),
    );
    row.insert(
        "library_layout_sdev".into(),
        opt(layout.and_then(|l| l.attr("NOMINAL_SDEV"))),
    );
    row.insert("library_strategy".into(), opt(lib("LIBRARY_STRATEGY")));
    row.insert("library_source".into(), opt(lib("LIBRARY_SOURCE")));
    row.insert("library_selection".into(), opt(lib("LIBRARY_SELECTION")));
    row.insert("identifiers".into(), identifier_list(node));
    row.insert(
        "attributes".into(),
        attribute_list(node, "EXPERIMENT_ATTRIBUTES", "EXPERIMENT_ATTRIBUTE"),
    );
    row.insert(
        "xrefs".into(),
        xref_list(&xref_pairs(node, "EXPERIMENT_LINKS", "EXPERIMENT_LINK")),
    );
    Value::Object(row)
}

fn run_row(node: &XmlNode) -> Value {
    let mut row = Map::new();
    row.insert("accession".into(), accession_of(node));
    row.insert("alias".into(), opt(node.attr("alias")));
    row.insert(
        "experiment_accession".into(),
        opt(node.child("EXPERIMENT_REF").and_then(|e| e.attr("accession"))),
    );
    row.insert("title".into(), opt(node.text_at(&["TITLE"])));
    row.insert("center_name".into(), opt(node.attr("center_name")));
    row.insert("total_spots".into(), int(node.attr("total_spots")));
    row.insert("total_bases".into(), int(node.attr("total_bases")));
    row.insert("size".into(), int(node.attr("size")));
    row.insert("published".into(), opt(node.attr("published")));
    row.insert("identifiers".into(), identifier_list(node));
    row.insert(
        "attributes".into(),
        attribute_list(node, "RUN_ATTRIBUTES", "RUN_ATTRIBUTE"),
    );
    Value::Object(row)
}
