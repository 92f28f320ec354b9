use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::domain::{LineageNode, TaxId};
use crate::error::AnnotateError;
use crate::http;

pub const DEFAULT_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

const MAX_LINEAGE_DEPTH: usize = 256;

/// Resolves an organism name to its lineage, ordered root to leaf.
///
/// The universal root (tax id 1) is never part of the returned lineage.
/// An unrecognized name is `UnknownOrganism`.
pub trait TaxonomySource: Send + Sync {
    fn lineage(&self, organism_name: &str) -> Result<Vec<LineageNode>, AnnotateError>;
}

/// NCBI E-utilities backed taxonomy lookups (`esearch` then `efetch`).
#[derive(Clone)]
pub struct EntrezTaxonomyClient {
    client: Client,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl EntrezTaxonomyClient {
    pub fn new(email: Option<String>, api_key: Option<String>) -> Result<Self, AnnotateError> {
        Self::with_base_url(DEFAULT_EUTILS_URL, email, api_key)
    }

    pub fn with_base_url(
        base_url: &str,
        email: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, AnnotateError> {
        let client = http::build_client(Duration::from_secs(30), AnnotateError::TaxonomyHttp)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            api_key,
        })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "taxonomy".to_string()),
            ("tool", "fragment-annotator".to_string()),
        ];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    fn get(&self, endpoint: &str, params: &[(&'static str, String)]) -> Result<String, AnnotateError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let common = self.common_params();
        let response = http::send_with_retries(
            || self.client.get(&url).query(&common).query(params),
            AnnotateError::TaxonomyHttp,
        )?;
        http::read_text(response, AnnotateError::TaxonomyHttp, taxonomy_status)
    }

    fn search_tax_id(&self, organism_name: &str) -> Result<TaxId, AnnotateError> {
        let term = format!("\"{organism_name}\"[Scientific Name]");
        let body = self.get(
            "esearch.fcgi",
            &[("term", term), ("retmode", "json".to_string())],
        )?;
        parse_esearch(&body)?
            .ok_or_else(|| AnnotateError::UnknownOrganism(organism_name.to_string()))
    }
}

impl TaxonomySource for EntrezTaxonomyClient {
    fn lineage(&self, organism_name: &str) -> Result<Vec<LineageNode>, AnnotateError> {
        let tax_id = self.search_tax_id(organism_name)?;
        let body = self.get(
            "efetch.fcgi",
            &[("id", tax_id.to_string()), ("retmode", "xml".to_string())],
        )?;
        parse_efetch_lineage(&body)
    }
}

fn taxonomy_status(status: u16, message: String) -> AnnotateError {
    AnnotateError::TaxonomyStatus { status, message }
}

#[derive(Debug, Deserialize)]
struct EsearchReply {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// First id of an `esearch` JSON reply, if any.
pub fn parse_esearch(body: &str) -> Result<Option<TaxId>, AnnotateError> {
    let reply: EsearchReply = serde_json::from_str(body)
        .map_err(|err| AnnotateError::TaxonomyParse(err.to_string()))?;
    reply
        .esearchresult
        .idlist
        .first()
        .map(|id| id.parse())
        .transpose()
}

#[derive(Debug, Deserialize)]
#[serde(rename = "TaxaSet")]
struct TaxaSetXml {
    #[serde(rename = "Taxon", default)]
    taxa: Vec<TaxonXml>,
}

#[derive(Debug, Deserialize)]
struct TaxonXml {
    #[serde(rename = "TaxId")]
    tax_id: i64,
    #[serde(rename = "ScientificName")]
    scientific_name: String,
    #[serde(rename = "LineageEx", default)]
    lineage: Option<LineageExXml>,
}

#[derive(Debug, Deserialize)]
struct LineageExXml {
    #[serde(rename = "Taxon", default)]
    taxa: Vec<LineageTaxonXml>,
}

#[derive(Debug, Deserialize)]
struct LineageTaxonXml {
    #[serde(rename = "TaxId")]
    tax_id: i64,
    #[serde(rename = "ScientificName")]
    scientific_name: String,
}

/// Lineage of the first taxon in an `efetch` TaxaSet: its `LineageEx` plus itself.
pub fn parse_efetch_lineage(body: &str) -> Result<Vec<LineageNode>, AnnotateError> {
    let set: TaxaSetXml = quick_xml::de::from_str(body)
        .map_err(|err| AnnotateError::TaxonomyParse(err.to_string()))?;
    let taxon = set
        .taxa
        .into_iter()
        .next()
        .ok_or_else(|| AnnotateError::TaxonomyParse("empty TaxaSet".to_string()))?;

    let mut lineage = taxon
        .lineage
        .map(|lineage| lineage.taxa)
        .unwrap_or_default()
        .into_iter()
        .map(|node| LineageNode::new(node.tax_id, node.scientific_name.trim()))
        .collect::<Vec<_>>();
    lineage.push(LineageNode::new(taxon.tax_id, taxon.scientific_name.trim()));
    lineage.retain(|node| node.tax_id != TaxId::ROOT);
    Ok(lineage)
}

/// Local lookups over an NCBI taxdump directory (`nodes.dmp`, `names.dmp`).
#[derive(Debug, Clone, Default)]
pub struct TaxdumpSource {
    parents: HashMap<TaxId, TaxId>,
    names: HashMap<TaxId, String>,
    name_index: HashMap<String, TaxId>,
}

impl TaxdumpSource {
    pub fn load(dir: &Utf8Path) -> Result<Self, AnnotateError> {
        let nodes = open_dump(&dir.join("nodes.dmp"))?;
        let names = open_dump(&dir.join("names.dmp"))?;
        Self::from_readers(nodes, names)
    }

    pub fn from_readers<N: BufRead, M: BufRead>(nodes: N, names: M) -> Result<Self, AnnotateError> {
        let mut source = Self::default();

        for line in nodes.lines() {
            let line = line.map_err(|err| AnnotateError::Filesystem(err.to_string()))?;
            let fields = split_dump_line(&line);
            // Skip malformed lines
            if fields.len() < 2 {
                continue;
            }
            let (Ok(tax_id), Ok(parent)) = (fields[0].parse::<TaxId>(), fields[1].parse::<TaxId>())
            else {
                continue;
            };
            source.parents.insert(tax_id, parent);
        }

        let mut synonyms = Vec::new();
        for line in names.lines() {
            let line = line.map_err(|err| AnnotateError::Filesystem(err.to_string()))?;
            let fields = split_dump_line(&line);
            if fields.len() < 4 {
                continue;
            }
            let Ok(tax_id) = fields[0].parse::<TaxId>() else {
                continue;
            };
            match fields[3] {
                "scientific name" => {
                    source.names.insert(tax_id, fields[1].to_string());
                    source.name_index.insert(fields[1].to_string(), tax_id);
                }
                "synonym" | "equivalent name" => synonyms.push((fields[1].to_string(), tax_id)),
                _ => {}
            }
        }
        // Scientific names win over synonyms.
        for (name, tax_id) in synonyms {
            source.name_index.entry(name).or_insert(tax_id);
        }

        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

impl TaxonomySource for TaxdumpSource {
    fn lineage(&self, organism_name: &str) -> Result<Vec<LineageNode>, AnnotateError> {
        let mut current = *self
            .name_index
            .get(organism_name.trim())
            .ok_or_else(|| AnnotateError::UnknownOrganism(organism_name.to_string()))?;

        let mut lineage = Vec::new();
        while current != TaxId::ROOT {
            if lineage.len() >= MAX_LINEAGE_DEPTH {
                return Err(AnnotateError::TaxonomyParse(format!(
                    "lineage of {organism_name} does not reach the root"
                )));
            }
            let name = self.names.get(&current).cloned().unwrap_or_default();
            lineage.push(LineageNode { tax_id: current, name });
            current = *self.parents.get(&current).ok_or_else(|| {
                AnnotateError::TaxonomyParse(format!("tax id {current} missing from nodes.dmp"))
            })?;
        }
        lineage.reverse();
        Ok(lineage)
    }
}

fn open_dump(path: &Utf8Path) -> Result<BufReader<File>, AnnotateError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| AnnotateError::Filesystem(format!("open {path}: {err}")))?;
    Ok(BufReader::new(file))
}

/// Fields of a `.dmp` line, which are separated by `\t|\t` and end with `\t|`.
fn split_dump_line(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\t', '|'])
        .split("\t|\t")
        .map(str::trim)
        .collect()
}
