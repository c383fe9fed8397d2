//! Columnar layout of NCBI BioSample and BioProject records

use super::dump::DumpKind;
use crate::sra::schema::{int, list_of, opt, struct_of, utf8};
use crate::sra::xml::XmlNode;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde_json::{json, Value};
use std::sync::Arc;

fn accession() -> Field {
    Field::new("accession", DataType::Utf8, false)
}

pub fn arrow_schema(kind: DumpKind) -> SchemaRef {
    let fields = match kind {
        DumpKind::Biosample => vec![
            accession(),
            utf8("id"),
            utf8("access"),
            utf8("publication_date"),
            utf8("last_update"),
            utf8("submission_date"),
            utf8("title"),
            utf8("description"),
            Field::new("taxon_id", DataType::Int64, true),
            utf8("taxonomy_name"),
            utf8("owner"),
            utf8("model"),
            utf8("package"),
            utf8("status"),
            utf8("status_date"),
            utf8("sra_sample"),
            utf8("gsm"),
            utf8("dbgap"),
            list_of("ids", struct_of(vec![utf8("db"), utf8("label"), utf8("id")])),
            list_of(
                "attributes",
                struct_of(vec![utf8("name"), utf8("harmonized_name"), utf8("value")]),
            ),
            list_of(
                "links",
                struct_of(vec![utf8("type"), utf8("target"), utf8("label"), utf8("value")]),
            ),
        ],
        DumpKind::Bioproject => vec![
            accession(),
            utf8("archive"),
            utf8("id"),
            utf8("name"),
            utf8("title"),
            utf8("description"),
            utf8("release_date"),
            utf8("submitted"),
            utf8("last_update"),
            utf8("organism_name"),
            Field::new("taxon_id", DataType::Int64, true),
            utf8("method_type"),
            utf8("target_material"),
            utf8("target_capture"),
            utf8("sample_scope"),
            list_of("data_types", DataType::Utf8),
            list_of("locus_tag_prefixes", DataType::Utf8),
            list_of("publications", struct_of(vec![utf8("id"), utf8("db")])),
            list_of(
                "external_links",
                struct_of(vec![utf8("label"), utf8("url"), utf8("db"), utf8("id")]),
            ),
            list_of(
                "grants",
                struct_of(vec![utf8("id"), utf8("title"), utf8("agency"), utf8("agency_abbr")]),
            ),
        ],
    };
    Arc::new(Schema::new(fields))
}

pub fn to_row(kind: DumpKind, node: &XmlNode) -> Value {
    match kind {
        DumpKind::Biosample => biosample_row(node),
        DumpKind::Bioproject => bioproject_row(node),
    }
}

fn joined_text<'a>(nodes: impl Iterator<Item = &'a XmlNode>) -> Option<String> {
    let parts: Vec<&str> = nodes.filter_map(|n| n.text()).collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn id_in<'a>(ids: &[&'a XmlNode], db: &str) -> Option<&'a str> {
    ids.iter()
        .copied()
        .find(|id| id.attr("db") == Some(db))
        .and_then(|id| id.text())
}

fn biosample_row(node: &XmlNode) -> Value {
    let description = node.child("Description");
    let organism = description.and_then(|d| d.child("Organism"));
    let status = node.child("Status");

    let ids: Vec<&XmlNode> = node
        .child("Ids")
        .map(|ids| ids.children_named("Id").collect())
        .unwrap_or_default();

    let comment = description
        .and_then(|d| d.child("Comment"))
        .and_then(|c| joined_text(c.children_named("Paragraph")));

    json!({
        "accession": opt(node.attr("accession")),
        "id": opt(node.attr("id")),
        "access": opt(node.attr("access")),
        "publication_date": opt(node.attr("publication_date")),
        "last_update": opt(node.attr("last_update")),
        "submission_date": opt(node.attr("submission_date")),
        "title": opt(description.and_then(|d| d.text_at(&["Title"]))),
        "description": comment,
        "taxon_id": int(organism.and_then(|o| o.attr("taxonomy_id"))),
        "taxonomy_name": opt(organism.and_then(|o| {
            o.attr("taxonomy_name").or_else(|| o.text_at(&["OrganismName"]))
        })),
        "owner": opt(node.text_at(&["Owner", "Name"])),
        "model": opt(node.text_at(&["Models", "Model"])),
        "package": opt(node.child("Package").and_then(|p| p.text())),
        "status": opt(status.and_then(|s| s.attr("status"))),
        "status_date": opt(status.and_then(|s| s.attr("when"))),
        "sra_sample": opt(id_in(&ids, "SRA")),
        "gsm": opt(id_in(&ids, "GEO")),
        "dbgap": opt(id_in(&ids, "dbGaP")),
        "ids": ids
            .iter()
            .map(|id| json!({
                "db": opt(id.attr("db")),
                "label": opt(id.attr("db_label")),
                "id": opt(id.text()),
            }))
            .collect::<Vec<_>>(),
        "attributes": node
            .child("Attributes")
            .map(|a| {
                a.children_named("Attribute")
                    .map(|attr| json!({
                        "name": opt(attr.attr("attribute_name")),
                        "harmonized_name": opt(attr.attr("harmonized_name")),
                        "value": opt(attr.text()),
                    }))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
        "links": node
            .child("Links")
            .map(|l| {
                l.children_named("Link")
                    .map(|link| json!({
                        "type": opt(link.attr("type")),
                        "target": opt(link.attr("target")),
                        "label": opt(link.attr("label")),
                        "value": opt(link.text()),
                    }))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
    })
}

/// `<Package><Project><Project>…</Project><Submission/></Project></Package>`
fn bioproject_row(package: &XmlNode) -> Value {
    let empty = XmlNode::default();
    let project = package.at(&["Project", "Project"]).unwrap_or(&empty);
    let submission = package.at(&["Project", "Submission"]);
    let archive = project.at(&["ProjectID", "ArchiveID"]);
    let descr = project.child("ProjectDescr").unwrap_or(&empty);
    let target = project.at(&["ProjectType", "ProjectTypeSubmission", "Target"]);
    let organism = target.and_then(|t| t.child("Organism"));

    let texts = |node: Option<&XmlNode>, name: &str| -> Vec<Value> {
        node.map(|n| {
            n.children_named(name)
                .filter_map(|c| c.text())
                .map(|t| Value::String(t.to_string()))
                .collect()
        })
        .unwrap_or_default()
    };

    json!({
        "accession": opt(archive.and_then(|a| a.attr("accession"))),
        "archive": opt(archive.and_then(|a| a.attr("archive"))),
        "id": opt(archive.and_then(|a| a.attr("id"))),
        "name": opt(descr.text_at(&["Name"])),
        "title": opt(descr.text_at(&["Title"])),
        "description": opt(descr.text_at(&["Description"])),
        "release_date": opt(descr.text_at(&["ProjectReleaseDate"])),
        "submitted": opt(submission.and_then(|s| s.attr("submitted"))),
        "last_update": opt(submission.and_then(|s| s.attr("last_update"))),
        "organism_name": opt(organism.and_then(|o| o.text_at(&["OrganismName"]))),
        "taxon_id": int(organism.and_then(|o| o.attr("taxID"))),
        "method_type": opt(project
            .at(&["ProjectType", "ProjectTypeSubmission", "Method"])
            .and_then(|m| m.attr("method_type"))),
        "target_material": opt(target.and_then(|t| t.attr("material"))),
        "target_capture": opt(target.and_then(|t| t.attr("capture"))),
        "sample_scope": opt(target.and_then(|t| t.attr("sample_scope"))),
        "data_types": texts(
            project.at(&["ProjectType", "ProjectTypeSubmission", "ProjectDataTypeSet"]),
            "DataType",
        ),
        "locus_tag_prefixes": texts(Some(descr), "LocusTagPrefix"),
        "publications": descr
            .children_named("Publication")
            .map(|p| json!({"id": opt(p.attr("id")), "db": opt(p.text_at(&["DbType"]))}))
            .collect::<Vec<_>>(),
        "external_links": descr
            .children_named("ExternalLink")
            .map(|l| json!({
                "label": opt(l.attr("label")),
                "url": opt(l.text_at(&["URL"])),
                "db": opt(l.text_at(&["dbXREF", "db"])),
                "id": opt(l.text_at(&["dbXREF", "ID"])),
            }))
            .collect::<Vec<_>>(),
        "grants": descr
            .children_named("Grant")
            .map(|g| {
                let agency = g.child("Agency");
                json!({
                    "id": opt(g.attr("GrantId")),
                    "title": opt(g.text_at(&["Title"])),
                    "agency": opt(agency.and_then(|a| a.text())),
                    "agency_abbr": opt(agency.and_then(|a| a.attr("abbr"))),
                })
            })
            .collect::<Vec<_>>(),
    })
}
