use std::sync::OnceLock;

use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::access::EntitlementsDocument;
use crate::endpoints::EndpointRegistry;
use crate::error::DirectPlusError;
use crate::search::{CriteriaSet, ENUMERATION_CEILING, HarvestReport};

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

const SHORT_HASH_LEN: usize = 12;

#[derive(Serialize)]
struct PartitionRow {
    hash: String,
    summary: String,
}

#[derive(Serialize)]
struct EndpointRow {
    key: String,
    path: String,
    parameters: Vec<String>,
    summary: Option<String>,
}

fn env() -> Result<&'static Environment<'static>, DirectPlusError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("short_hash", |hash: String| -> String {
        hash.chars().take(SHORT_HASH_LEN).collect()
    });
    env.add_template("hits.md.j2", include_str!("../../templates/hits.md.j2"))?;
    env.add_template("count.md.j2", include_str!("../../templates/count.md.j2"))?;
    env.add_template("split.md.j2", include_str!("../../templates/split.md.j2"))?;
    env.add_template("hash.md.j2", include_str!("../../templates/hash.md.j2"))?;
    env.add_template(
        "endpoints.md.j2",
        include_str!("../../templates/endpoints.md.j2"),
    )?;
    env.add_template(
        "entitlements.md.j2",
        include_str!("../../templates/entitlements.md.j2"),
    )?;
    env.add_template(
        "document.md.j2",
        include_str!("../../templates/document.md.j2"),
    )?;

    let _ = ENV.set(env);
    ENV.get().ok_or_else(|| {
        DirectPlusError::Api {
            api: "render".into(),
            message: "template environment unavailable".into(),
        }
    })
}

pub fn hits_markdown(
    report: &HarvestReport,
    criteria: &CriteriaSet,
) -> Result<String, DirectPlusError> {
    let tmpl = env()?.get_template("hits.md.j2")?;
    Ok(tmpl.render(context! {
        report => report,
        criteria => criteria.summary(),
    })?)
}

pub fn count_markdown(criteria: &CriteriaSet, count: u64) -> Result<String, DirectPlusError> {
    let tmpl = env()?.get_template("count.md.j2")?;
    Ok(tmpl.render(context! {
        criteria => criteria.summary(),
        count => count,
        ceiling => ENUMERATION_CEILING,
    })?)
}

pub fn split_markdown(
    criteria: &CriteriaSet,
    partitions: &[CriteriaSet],
) -> Result<String, DirectPlusError> {
    let rows = partitions
        .iter()
        .map(|partition| PartitionRow {
            hash: partition.hash(),
            summary: partition.summary(),
        })
        .collect::<Vec<_>>();
    let tmpl = env()?.get_template("split.md.j2")?;
    Ok(tmpl.render(context! {
        criteria => criteria.summary(),
        partitions => rows,
    })?)
}

pub fn hash_markdown(criteria: &CriteriaSet) -> Result<String, DirectPlusError> {
    let tmpl = env()?.get_template("hash.md.j2")?;
    Ok(tmpl.render(context! {
        hash => criteria.hash(),
        canonical => criteria.canonical_json(),
    })?)
}

pub fn endpoints_markdown(registry: &EndpointRegistry) -> Result<String, DirectPlusError> {
    let rows = registry
        .iter()
        .map(|endpoint| EndpointRow {
            key: endpoint.key(),
            path: endpoint.path.clone(),
            parameters: endpoint
                .parameters
                .iter()
                .map(|p| {
                    if p.required {
                        format!("{}*", p.name)
                    } else {
                        p.name.clone()
                    }
                })
                .collect(),
            summary: endpoint.summary.clone(),
        })
        .collect::<Vec<_>>();
    let tmpl = env()?.get_template("endpoints.md.j2")?;
    Ok(tmpl.render(context! { endpoints => rows })?)
}

pub fn entitlements_markdown(doc: &EntitlementsDocument) -> Result<String, DirectPlusError> {
    let granted = doc
        .granted()
        .map(|e| e.entitlement_id.as_str())
        .collect::<Vec<_>>();
    let tmpl = env()?.get_template("entitlements.md.j2")?;
    Ok(tmpl.render(context! {
        doc => doc,
        granted => granted,
    })?)
}

/// A raw operation response under a heading.
pub fn document_markdown(title: &str, body: &Value) -> Result<String, DirectPlusError> {
    let tmpl = env()?.get_template("document.md.j2")?;
    Ok(tmpl.render(context! {
        title => title,
        body => serde_json::to_string_pretty(body)?,
    })?)
}
