//! Structured product label strategy.
//!
//! The source publishes a zip of dated releases. Each release is itself a zip
//! holding one SPL XML document. The product data elements section lists the
//! products; a product links to its REMS administrator through a `subjectOf`
//! document titled "REMS API".

use std::io::{Cursor, Read};
use std::time::Duration;

use axum::body::Bytes;
use roxmltree::{Document, Node};
use time::Date;
use time::macros::format_description;
use tracing::debug;

use super::{DirectoryError, Discovered};

/// LOINC code of the SPL product data elements section.
pub const PRODUCT_DATA_SECTION: &str = "48780-1";
const REMS_LINK_TITLE: &str = "REMS API";
/// Largest archive entry read into memory, whatever its header declares.
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct SplDirectory {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    discovery_prefix: String,
}

impl SplDirectory {
    pub(crate) fn new(
        client: reqwest::Client,
        url: String,
        timeout: Duration,
        discovery_prefix: String,
    ) -> Self {
        Self {
            client,
            url,
            timeout,
            discovery_prefix,
        }
    }

    /// Downloads the full outer archive.
    pub(crate) async fn fetch_archive(&self) -> Result<Bytes, DirectoryError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DirectoryError::http(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DirectoryError::http(&self.url, e))?;
        debug!(url = %self.url, bytes = bytes.len(), "Downloaded SPL archive");
        Ok(bytes)
    }

    /// Searches the release dated `date` for a product named `names`.
    ///
    /// Archive extraction and parsing run on the blocking pool.
    pub(crate) async fn lookup(
        &self,
        archive: Bytes,
        date: Date,
        names: Vec<String>,
    ) -> Result<Option<Discovered>, DirectoryError> {
        let prefix = self.discovery_prefix.clone();
        tokio::task::spawn_blocking(move || {
            let Some(xml) = extract_release_document(&archive, date)? else {
                debug!(%date, "No SPL release for reference date");
                return Ok(None);
            };
            find_rems_product(&xml, &names, &prefix)
        })
        .await
        .map_err(|e| DirectoryError::Archive(format!("SPL task failed: {e}")))?
    }
}

/// XML document of the nested release archive whose name carries `date`.
///
/// `Ok(None)` when no release matches the date.
pub fn extract_release_document(archive: &[u8], date: Date) -> Result<Option<String>, DirectoryError> {
    let stamp = date
        .format(format_description!("[year][month][day]"))
        .map_err(|e| DirectoryError::Archive(format!("cannot format date {date}: {e}")))?;

    let mut outer = zip::ZipArchive::new(Cursor::new(archive)).map_err(DirectoryError::archive)?;
    let mut nested = None;
    for index in 0..outer.len() {
        let mut entry = outer.by_index(index).map_err(DirectoryError::archive)?;
        if entry.is_dir() || !entry.name().ends_with(".zip") || !entry.name().contains(&stamp) {
            continue;
        }
        debug!(entry = entry.name(), "Selected SPL release");
        nested = Some(read_bounded(&mut entry, MAX_ENTRY_BYTES)?);
        break;
    }
    let Some(nested) = nested else {
        return Ok(None);
    };

    let mut inner = zip::ZipArchive::new(Cursor::new(nested)).map_err(DirectoryError::archive)?;
    for index in 0..inner.len() {
        let mut entry = inner.by_index(index).map_err(DirectoryError::archive)?;
        if entry.is_dir() || !entry.name().ends_with(".xml") {
            continue;
        }
        let bytes = read_bounded(&mut entry, MAX_ENTRY_BYTES)?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| DirectoryError::Archive(format!("SPL document is not UTF-8: {e}")))?;
        return Ok(Some(xml));
    }
    Err(DirectoryError::MissingDocument(stamp))
}

fn read_bounded(reader: &mut impl Read, limit: u64) -> Result<Vec<u8>, DirectoryError> {
    let mut bytes = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| DirectoryError::Archive(e.to_string()))?;
    if bytes.len() as u64 > limit {
        return Err(DirectoryError::Archive(format!(
            "archive entry exceeds {limit} bytes"
        )));
    }
    Ok(bytes)
}

/// Product in the product data elements section.
#[derive(Debug, Clone, PartialEq)]
pub struct SplProduct {
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    /// REMS reference with the discovery prefix removed.
    pub rems_reference: Option<String>,
}

impl SplProduct {
    fn matches_any(&self, names: &[String]) -> bool {
        names.iter().any(|wanted| {
            [&self.brand_name, &self.generic_name]
                .into_iter()
                .flatten()
                .any(|name| name.trim().eq_ignore_ascii_case(wanted.trim()))
        })
    }
}

/// Every product listed in the product data elements section.
pub fn parse_products(xml: &str, discovery_prefix: &str) -> Result<Vec<SplProduct>, DirectoryError> {
    let doc = Document::parse(xml).map_err(|e| DirectoryError::Xml(e.to_string()))?;
    let body = child(doc.root_element(), "component")
        .and_then(|c| child(c, "structuredBody"))
        .ok_or_else(|| DirectoryError::MissingSection("structuredBody".into()))?;

    let section = body
        .descendants()
        .filter(|n| is(*n, "section"))
        .find(|section| {
            child(*section, "code").and_then(|c| c.attribute("code")) == Some(PRODUCT_DATA_SECTION)
        })
        .ok_or_else(|| DirectoryError::MissingSection(PRODUCT_DATA_SECTION.into()))?;

    let products = children(section, "subject")
        .filter_map(|subject| child(subject, "manufacturedProduct"))
        .map(|outer| {
            let product = child(outer, "manufacturedProduct");
            let brand_name = product.and_then(|p| child(p, "name")).and_then(text);
            let generic_name = product
                .and_then(|p| child(p, "asEntityWithGeneric"))
                .and_then(|g| child(g, "genericMedicine"))
                .and_then(|m| child(m, "name"))
                .and_then(text);
            let rems_reference = rems_reference(outer).map(|value| {
                value
                    .strip_prefix(discovery_prefix)
                    .unwrap_or(&value)
                    .trim()
                    .to_string()
            });
            SplProduct {
                brand_name,
                generic_name,
                rems_reference,
            }
        })
        .collect();
    Ok(products)
}

/// REMS administrator of the first product matching one of `names`.
pub fn find_rems_product(
    xml: &str,
    names: &[String],
    discovery_prefix: &str,
) -> Result<Option<Discovered>, DirectoryError> {
    let found = parse_products(xml, discovery_prefix)?
        .into_iter()
        .filter(|product| product.matches_any(names))
        .find_map(|product| {
            let base_url = product.rems_reference.filter(|r| !r.is_empty())?;
            Some(Discovered {
                base_url,
                brand_name: product.brand_name,
                generic_name: product.generic_name,
            })
        });
    Ok(found)
}

fn rems_reference(product: Node<'_, '_>) -> Option<String> {
    children(product, "subjectOf")
        .filter_map(|s| child(s, "document"))
        .filter(|document| {
            child(*document, "title")
                .and_then(text)
                .is_some_and(|title| title.contains(REMS_LINK_TITLE))
        })
        .find_map(|document| {
            document
                .descendants()
                .filter(|n| is(*n, "reference"))
                .find_map(|n| n.attribute("value"))
                .map(str::to_string)
        })
}

fn is(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| is(*n, name))
}

fn children<'a, 'i: 'a>(node: Node<'a, 'i>, name: &'a str) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children().filter(move |n| is(*n, name))
}

fn text(node: Node<'_, '_>) -> Option<String> {
    let value: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
