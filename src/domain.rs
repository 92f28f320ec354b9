use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnnotateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxId(i64);

impl TaxId {
    pub const ROOT: TaxId = TaxId(1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxId {
    type Err = AnnotateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<i64>()
            .map_err(|_| AnnotateError::TaxonomyParse(format!("invalid tax id: {value}")))?;
        if parsed <= 0 {
            return Err(AnnotateError::TaxonomyParse(format!(
                "invalid tax id: {value}"
            )));
        }
        Ok(Self(parsed))
    }
}

/// One sequencing read. The header is the unique key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub header: String,
    pub sequence: String,
    pub quality: String,
}

impl Fragment {
    pub fn new(header: &str, sequence: &str, quality: &str) -> Result<Self, AnnotateError> {
        let header = header.trim();
        let sequence = sequence.trim();
        if header.is_empty() {
            return Err(AnnotateError::InvalidRecord {
                line: 0,
                message: "empty fragment header".to_string(),
            });
        }
        if sequence.is_empty() {
            return Err(AnnotateError::InvalidRecord {
                line: 0,
                message: format!("empty sequence for fragment {header}"),
            });
        }
        Ok(Self {
            header: header.to_string(),
            sequence: sequence.to_string(),
            quality: quality.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Taxon {
    pub tax_id: TaxId,
    pub name: String,
    pub parent_tax_id: Option<TaxId>,
}

/// One element of a lineage as reported by a taxonomy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageNode {
    pub tax_id: TaxId,
    pub name: String,
}

impl LineageNode {
    pub fn new(tax_id: i64, name: &str) -> Self {
        Self {
            tax_id: TaxId::new(tax_id),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Protein {
    pub accession: String,
    pub tax_id: Option<TaxId>,
    pub sequence: Option<String>,
    pub name: String,
}

/// Normalized summary of one BLAST hit and its best HSP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentRecord {
    pub accession: String,
    pub title: String,
    pub protein_name: String,
    pub organism_name: Option<String>,
    pub score: f64,
    pub expect: f64,
    pub identities: u32,
    pub positives: u32,
    pub gaps: u32,
}

impl AlignmentRecord {
    pub fn protein(&self, tax_id: Option<TaxId>) -> Protein {
        Protein {
            accession: self.accession.clone(),
            tax_id,
            sequence: None,
            name: self.protein_name.clone(),
        }
    }
}
